use std::fmt::Display;

/// Error types that can be built from a plain message.
///
/// Crates implement this for their own error enum and then call
/// [`impl_context!`] with that type to get `.context()` and
/// `.with_context()` on `Result` and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// `"{context}: {cause}"`, the one shape every wrapped error message takes.
pub fn with_cause(context: impl Display, cause: impl Display) -> String {
    format!("{context}: {cause}")
}

/// Generate a crate-local `Context` trait producing the given error type.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// switchyard_common::impl_context!(Error);
/// ```
#[macro_export]
macro_rules! impl_context {
    ($error:ty) => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> std::result::Result<T, $error>;

            fn with_context<C: Into<String>>(
                self,
                f: impl FnOnce() -> C,
            ) -> std::result::Result<T, $error>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> std::result::Result<T, $error> {
                <Self as Context<T>>::with_context(self, || context)
            }

            fn with_context<C: Into<String>>(
                self,
                f: impl FnOnce() -> C,
            ) -> std::result::Result<T, $error> {
                self.map_err(|cause| {
                    <$error as $crate::FromMessage>::from_message($crate::error::with_cause(
                        f().into(),
                        cause,
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> std::result::Result<T, $error> {
                <Self as Context<T>>::with_context(self, || context)
            }

            fn with_context<C: Into<String>>(
                self,
                f: impl FnOnce() -> C,
            ) -> std::result::Result<T, $error> {
                self.ok_or_else(|| <$error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
