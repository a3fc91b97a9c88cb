//! Declarative macros for module development.

/// Export a module type through the native ABI.
///
/// Generates `dockhand_module_abi_version` and `dockhand_module_create`.
/// The one-argument form builds the instance with `Default::default`; the
/// two-argument form takes any constructor expression returning the type.
///
/// # Example
///
/// ```rust,ignore
/// use dockhand_module_sdk::prelude::*;
///
/// struct Compose { bin: String }
///
/// impl Compose {
///     fn new() -> Self { Self { bin: "docker".into() } }
/// }
///
/// export_module!(Compose, Compose::new);
/// ```
///
/// A panic inside the constructor yields a null pointer, which the host
/// reports as a load failure.
#[macro_export]
macro_rules! export_module {
    ($ty:ty) => {
        $crate::export_module!($ty, <$ty as ::core::default::Default>::default);
    };
    ($ty:ty, $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn dockhand_module_abi_version() -> u32 {
            $crate::MODULE_ABI_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn dockhand_module_create() -> *mut ::std::boxed::Box<dyn $crate::Module> {
            let built = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                let instance: $ty = ($ctor)();
                let module: ::std::boxed::Box<dyn $crate::Module> =
                    ::std::boxed::Box::new(instance);
                module
            }));
            match built {
                Ok(module) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(module)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
