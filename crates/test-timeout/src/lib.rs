//! `#[tokio_timeout_test]`: runs an async test on its own current-thread
//! runtime and fails it instead of hanging when a session loop never settles.
//!
//! Arguments, all optional and comma separated:
//! - an integer: timeout in seconds (default 30)
//! - `paused`: start the runtime with a paused clock so interval-driven code
//!   advances in virtual time (the test crate needs tokio's `test-util`)

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, ItemFn, Lit, Token};

struct Options {
    timeout_secs: u64,
    paused: bool,
}

impl Options {
    fn parse(attr: TokenStream2) -> syn::Result<Self> {
        let mut options = Options {
            timeout_secs: 30,
            paused: false,
        };
        let args = Punctuated::<Expr, Token![,]>::parse_terminated.parse2(attr)?;
        for arg in args {
            match &arg {
                Expr::Lit(ExprLit {
                    lit: Lit::Int(lit), ..
                }) => {
                    let secs: u64 = lit.base10_parse()?;
                    if secs == 0 {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "timeout must be greater than zero",
                        ));
                    }
                    options.timeout_secs = secs;
                }
                Expr::Path(path) if path.path.is_ident("paused") => options.paused = true,
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected a timeout in seconds or `paused`",
                    ))
                }
            }
        }
        Ok(options)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match Options::parse(attr.into()) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let timeout = options.timeout_secs;
    let pause_clock: TokenStream2 = if options.paused {
        quote! { builder.start_paused(true); }
    } else {
        quote! {}
    };

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let mut builder = tokio::runtime::Builder::new_current_thread();
                    builder.enable_all();
                    #pause_clock
                    let runtime = builder.build().expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(timeout_duration, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

/// Drops `#[test]` and `#[tokio::test]` so the generated `#[test]` is the only one.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(segments.as_slice(), [name] if name == "test")
        || matches!(segments.as_slice(), [krate, name] if krate == "tokio" && name == "test")
}
