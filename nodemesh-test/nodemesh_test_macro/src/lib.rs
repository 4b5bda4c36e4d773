/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn, LitInt};

/// Default upper bound on a single test body, in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Runs an `async fn` test returning a `Result` on a fresh multi-thread Tokio runtime.
///
/// Panics raised on the test thread or on the test's runtime threads
/// (including inside spawned tasks) are captured and re-raised once the body
/// finishes, so a panicking mailbox task cannot pass silently. Panics on other
/// threads, such as those of tests running concurrently, are left alone. The body is bounded by
/// `timeout_ms` (default 30 seconds):
///
/// ```rust,ignore
/// #[nodemesh_test(timeout_ms = 5000)]
/// async fn heartbeats_arrive() -> anyhow::Result<()> { Ok(()) }
/// ```
#[proc_macro_attribute]
pub fn nodemesh_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut timeout_ms = DEFAULT_TIMEOUT_MS;
    let attr_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("timeout_ms") {
            let value: LitInt = meta.value()?.parse()?;
            timeout_ms = value.base10_parse()?;
            Ok(())
        } else {
            Err(meta.error("unsupported nodemesh_test property"))
        }
    });
    parse_macro_input!(attr with attr_parser);

    let input = parse_macro_input!(item as ItemFn);
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    let async_name = syn::Ident::new(&format!("__{name}_async"), name.span());

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            use ::std::collections::HashSet;
            use ::std::sync::atomic::{AtomicBool, Ordering};
            use ::std::sync::Arc;
            use ::std::thread::ThreadId;
            use ::nodemesh_test::__private::{parking_lot, tokio, tracing};

            #[derive(Default)]
            struct PanicCapture {
                occurred: AtomicBool,
                message: parking_lot::Mutex<Option<String>>,
                location: parking_lot::Mutex<Option<String>>,
            }

            let capture = Arc::new(PanicCapture::default());
            let hook_capture = Arc::clone(&capture);

            // The hook is process-wide; only threads listed here belong to this test.
            let test_threads: Arc<parking_lot::Mutex<HashSet<ThreadId>>> = Arc::default();
            test_threads.lock().insert(::std::thread::current().id());
            let hook_threads = Arc::clone(&test_threads);
            let runtime_threads = Arc::clone(&test_threads);

            let previous_hook = ::std::panic::take_hook();
            ::std::panic::set_hook(Box::new(move |info| {
                if !hook_threads.lock().contains(&::std::thread::current().id()) {
                    previous_hook(info);
                    return;
                }
                hook_capture.occurred.store(true, Ordering::SeqCst);
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned());
                *hook_capture.location.lock() = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                tracing::error!(panic = message.as_deref().unwrap_or("<non-string payload>"), "panic during test");
                *hook_capture.message.lock() = message;
                previous_hook(info);
            }));

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .on_thread_start(move || {
                    runtime_threads.lock().insert(::std::thread::current().id());
                })
                .build()
                .expect("failed to build the test runtime");

            let result = runtime.block_on(async {
                let test_span = tracing::info_span!("nodemesh_test", name = stringify!(#name));
                let _enter = test_span.enter();

                match tokio::time::timeout(
                    ::std::time::Duration::from_millis(#timeout_ms),
                    #async_name(),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => panic!("test {} timed out after {} ms", stringify!(#name), #timeout_ms),
                }
            });

            // Give spawned tasks a moment to wind down before the runtime is dropped.
            runtime.shutdown_timeout(::std::time::Duration::from_millis(100));

            if capture.occurred.load(Ordering::SeqCst) {
                let location = capture
                    .location
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown location".to_string());
                let message = capture
                    .message
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "no panic message".to_string())
                    .trim()
                    .replace('\n', " ");
                panic!("Panic at {}: {}", location, message);
            }

            if let Err(error) = result {
                panic!("test {} failed: {:?}", stringify!(#name), error);
            }
        }

        async fn #async_name(#inputs) #output #body
    };

    expanded.into()
}
