//! Attribute macros for txfixture
//!
//! ```rust,ignore
//! #[txfixture::transactional]
//! #[tokio::test]
//! async fn test_signup_creates_user() -> anyhow::Result<()> {
//!     // every write here is rolled back afterwards
//!     Ok(())
//! }
//! ```

use proc_macro::TokenStream;

mod transactional;

/// Run an async test inside a transactional context.
///
/// The context comes from `txfixture::Harness::global()`, so configured
/// substitution targets are rebound for the duration of the test. Place the
/// attribute above the test runtime's attribute (`#[tokio::test]`) so the
/// wrapping happens inside the async body.
#[proc_macro_attribute]
pub fn transactional(attr: TokenStream, item: TokenStream) -> TokenStream {
    transactional::transactional_impl(attr.into(), item.into()).into()
}
