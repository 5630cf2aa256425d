//! Helper macros for ABI function generation.

/// Generate an always-exported `extern "C"` function.
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the function.
///     fn boundtag_thing(arg: Type) -> ReturnType {
///         // implementation body
///     }
/// }
/// ```
///
/// Expands to a `#[unsafe(no_mangle)] pub unsafe extern "C" fn`. Only use it
/// for symbols that cannot collide with the host libc; the allocator entry
/// points are declared by hand so their export can follow the build profile.
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            unsafe { $body }
        }
    };

    // Variant without return type (returns ())
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) {
            unsafe { $body }
        }
    };
}

pub(crate) use abi_fn;
