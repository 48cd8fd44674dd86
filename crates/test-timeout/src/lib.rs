use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, LitStr, ReturnType, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Environment variable that multiplies every timeout, for slow CI hosts.
const SCALE_ENV: &str = "TEST_TIMEOUT_SCALE";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

/// Arguments accepted by both attributes:
/// `#[timeout]`, `#[timeout(5)]`,
/// `#[tokio_timeout_test(10, flavor = "multi_thread", worker_threads = 4)]`.
struct TimeoutArgs {
    secs: u64,
    flavor: Flavor,
    worker_threads: Option<usize>,
}

impl Default for TimeoutArgs {
    fn default() -> Self {
        Self {
            secs: DEFAULT_TIMEOUT_SECS,
            flavor: Flavor::CurrentThread,
            worker_threads: None,
        }
    }
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs::default();
        while !input.is_empty() {
            if input.peek(LitInt) {
                let lit: LitInt = input.parse()?;
                args.secs = lit.base10_parse()?;
                if args.secs == 0 {
                    return Err(syn::Error::new_spanned(
                        lit,
                        "timeout must be greater than zero",
                    ));
                }
            } else {
                let key: Ident = input.parse()?;
                input.parse::<Token![=]>()?;
                match key.to_string().as_str() {
                    "flavor" => {
                        let value: LitStr = input.parse()?;
                        args.flavor = match value.value().as_str() {
                            "current_thread" => Flavor::CurrentThread,
                            "multi_thread" => Flavor::MultiThread,
                            other => {
                                return Err(syn::Error::new_spanned(
                                    value,
                                    format!("unknown runtime flavor `{other}`"),
                                ))
                            }
                        };
                    }
                    "worker_threads" => {
                        let value: LitInt = input.parse()?;
                        args.worker_threads = Some(value.base10_parse()?);
                    }
                    other => {
                        return Err(syn::Error::new_spanned(
                            key.clone(),
                            format!("unknown timeout argument `{other}`"),
                        ))
                    }
                }
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        if args.worker_threads.is_some() && args.flavor != Flavor::MultiThread {
            return Err(input.error("worker_threads requires flavor = \"multi_thread\""));
        }
        Ok(args)
    }
}

impl TimeoutArgs {
    fn duration_tokens(&self) -> TokenStream2 {
        let secs = self.secs;
        quote! {
            {
                let scale: u64 = std::env::var(#SCALE_ENV)
                    .ok()
                    .and_then(|value| value.parse().ok())
                    .filter(|scale: &u64| *scale > 0)
                    .unwrap_or(1);
                std::time::Duration::from_secs(#secs * scale)
            }
        }
    }

    fn runtime_tokens(&self) -> TokenStream2 {
        match self.flavor {
            Flavor::CurrentThread => quote! {
                tokio::runtime::Builder::new_current_thread()
            },
            Flavor::MultiThread => {
                let workers = self.worker_threads.map(|count| {
                    quote! { .worker_threads(#count) }
                });
                quote! {
                    tokio::runtime::Builder::new_multi_thread() #workers
                }
            }
        }
    }
}

/// Runs an async test on its own Tokio runtime and fails it once the timeout elapses.
/// Tests may return a `Result`; its error type must be `Send` to leave the watchdog thread.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
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

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let output = match &sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    let timeout = args.duration_tokens();
    let runtime = args.runtime_tokens();
    // `?` in the body needs the future's output pinned to the declared return type.
    let body = quote! {
        let runtime = #runtime
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        let test_body = std::pin::pin!(async move #block);
        let test_body: std::pin::Pin<&mut dyn std::future::Future<Output = #output>> = test_body;
        runtime.block_on(async {
            tokio::time::timeout(timeout_duration, test_body)
                .await
                .expect("test timed out")
        })
    };

    wrap_in_watchdog(filtered_attrs, vis, sig, timeout, body).into()
}

/// Runs a synchronous test on a watchdog thread and fails it once the timeout elapses.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
    if args.flavor != Flavor::CurrentThread {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "timeout does not start a runtime; use tokio_timeout_test for flavors",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let timeout = args.duration_tokens();
    let body = quote! { #block };

    wrap_in_watchdog(filtered_attrs, vis, sig, timeout, body).into()
}

fn wrap_in_watchdog(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    timeout: TokenStream2,
    body: TokenStream2,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let timeout_duration: std::time::Duration = #timeout;
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
