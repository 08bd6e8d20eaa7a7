//! C-compatible plugin descriptor exported by plugin shared libraries.
//!
//! A plugin library exports one symbol:
//!
//! ```c
//! const PluginDescriptor* trellis_plugin_descriptor();
//! ```
//!
//! The descriptor lists the plugin's element features and a constructor for
//! each. Constructors return a `Box<Box<dyn ElementImpl>>` as an opaque
//! pointer, so plugins must be built against the same trellis version and
//! compiler as the host; [`TRELLIS_ABI_VERSION`] guards the layout.

use std::ffi::{CStr, c_char, c_void};

use super::{ElementMetadata, PluginError, Rank};
use crate::element::ElementImpl;

/// Descriptor layout version. Plugins built for another version are refused.
pub const TRELLIS_ABI_VERSION: u32 = 1;

/// Name of the exported entry point.
pub const PLUGIN_ENTRY_POINT: &[u8] = b"trellis_plugin_descriptor\0";

/// Element constructor exported by a plugin.
///
/// # Safety
///
/// Must return a pointer produced by [`element_to_raw`], or null.
pub type CreateElementFn = unsafe extern "C" fn() -> *mut c_void;

/// One element feature of a plugin.
#[repr(C)]
pub struct ElementDescriptor {
    /// Null-terminated factory name.
    pub name: *const c_char,
    /// Null-terminated classification (`Source`, `Sink/Fake`, ...).
    pub klass: *const c_char,
    /// Null-terminated description.
    pub description: *const c_char,
    /// [`Rank`] as its numeric value.
    pub rank: u32,
    /// Constructor.
    pub create: CreateElementFn,
}

// SAFETY: only pointers to static data and function pointers.
unsafe impl Send for ElementDescriptor {}
unsafe impl Sync for ElementDescriptor {}

/// Descriptor returned by `trellis_plugin_descriptor()`.
#[repr(C)]
pub struct PluginDescriptor {
    /// Must equal [`TRELLIS_ABI_VERSION`].
    pub abi_version: u32,
    /// Null-terminated plugin name.
    pub name: *const c_char,
    /// Null-terminated version string.
    pub version: *const c_char,
    /// Null-terminated description.
    pub description: *const c_char,
    /// Length of `elements`.
    pub num_elements: u32,
    /// Element features.
    pub elements: *const ElementDescriptor,
}

// SAFETY: only pointers to static data.
unsafe impl Send for PluginDescriptor {}
unsafe impl Sync for PluginDescriptor {}

/// Owned copy of a descriptor's metadata.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DescriptorInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub features: Vec<ElementMetadata>,
}

/// # Safety
///
/// `ptr` must be null or point to a null-terminated string.
unsafe fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees a valid null-terminated string.
    let s = unsafe { CStr::from_ptr(ptr) };
    Some(s.to_string_lossy().into_owned())
}

impl PluginDescriptor {
    /// Element descriptors.
    ///
    /// # Safety
    ///
    /// `elements` must point to `num_elements` valid descriptors.
    pub unsafe fn elements(&self) -> &[ElementDescriptor] {
        if self.elements.is_null() || self.num_elements == 0 {
            &[]
        } else {
            // SAFETY: caller guarantees the array is valid.
            unsafe { std::slice::from_raw_parts(self.elements, self.num_elements as usize) }
        }
    }

    /// Check the ABI version and copy the metadata out.
    ///
    /// # Safety
    ///
    /// Every pointer in the descriptor must be null or valid.
    pub(crate) unsafe fn read(&self) -> Result<DescriptorInfo, PluginError> {
        if self.abi_version != TRELLIS_ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                expected: TRELLIS_ABI_VERSION,
                actual: self.abi_version,
            });
        }
        // SAFETY: caller guarantees pointer validity.
        let name = unsafe { c_str(self.name) }
            .ok_or_else(|| PluginError::InvalidDescriptor("plugin name is null".into()))?;
        // SAFETY: as above.
        let version = unsafe { c_str(self.version) }.unwrap_or_else(|| "0.0.0".into());
        // SAFETY: as above.
        let description = unsafe { c_str(self.description) }.unwrap_or_default();

        let mut features = Vec::new();
        // SAFETY: as above.
        for element in unsafe { self.elements() } {
            // SAFETY: as above.
            let feature = unsafe { c_str(element.name) }.ok_or_else(|| {
                PluginError::InvalidDescriptor(format!("element name is null in {name}"))
            })?;
            features.push(ElementMetadata {
                name: feature,
                // SAFETY: as above.
                klass: unsafe { c_str(element.klass) }.unwrap_or_default(),
                // SAFETY: as above.
                description: unsafe { c_str(element.description) }.unwrap_or_default(),
                rank: Rank::from_value(element.rank),
            });
        }
        Ok(DescriptorInfo {
            name,
            version,
            description,
            features,
        })
    }
}

/// Box an implementation for return through [`CreateElementFn`].
pub fn element_to_raw(imp: Box<dyn ElementImpl>) -> *mut c_void {
    let boxed: Box<Box<dyn ElementImpl>> = Box::new(imp);
    Box::into_raw(boxed).cast()
}

/// Reclaim an implementation returned by a [`CreateElementFn`]. Null
/// yields `None`.
///
/// # Safety
///
/// A non-null `ptr` must come from [`element_to_raw`] and not have been
/// reclaimed.
pub unsafe fn element_from_raw(ptr: *mut c_void) -> Option<Box<dyn ElementImpl>> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null, and the caller guarantees it came from element_to_raw.
    let boxed: Box<Box<dyn ElementImpl>> = unsafe { Box::from_raw(ptr.cast()) };
    Some(*boxed)
}

/// Export a plugin descriptor from a `cdylib` crate.
///
/// ```rust,ignore
/// use trellis::prelude::*;
///
/// #[derive(Default)]
/// struct Gain;
/// impl ElementImpl for Gain {}
///
/// trellis::declare_plugin! {
///     name: "gain",
///     version: "1.0.0",
///     description: "Volume control",
///     elements: [
///         {
///             name: "gain",
///             klass: "Filter/Audio",
///             description: "Scales samples",
///             rank: Rank::Primary,
///             create: || Box::new(Gain),
///         },
///     ],
/// }
/// ```
#[macro_export]
macro_rules! declare_plugin {
    (
        name: $name:literal,
        version: $version:literal,
        description: $desc:literal,
        elements: [
            $(
                {
                    name: $el_name:literal,
                    klass: $klass:literal,
                    description: $el_desc:literal,
                    rank: $rank:expr,
                    create: $create:expr $(,)?
                }
            ),* $(,)?
        ] $(,)?
    ) => {
        static __TRELLIS_ELEMENTS: &[$crate::registry::ElementDescriptor] = &[
            $(
                $crate::registry::ElementDescriptor {
                    name: concat!($el_name, "\0").as_ptr() as *const ::std::ffi::c_char,
                    klass: concat!($klass, "\0").as_ptr() as *const ::std::ffi::c_char,
                    description: concat!($el_desc, "\0").as_ptr() as *const ::std::ffi::c_char,
                    rank: $rank as u32,
                    create: {
                        unsafe extern "C" fn create() -> *mut ::std::ffi::c_void {
                            let make: fn() -> ::std::boxed::Box<dyn $crate::element::ElementImpl> =
                                $create;
                            $crate::registry::element_to_raw(make())
                        }
                        create
                    },
                },
            )*
        ];

        static __TRELLIS_PLUGIN: $crate::registry::PluginDescriptor =
            $crate::registry::PluginDescriptor {
                abi_version: $crate::registry::TRELLIS_ABI_VERSION,
                name: concat!($name, "\0").as_ptr() as *const ::std::ffi::c_char,
                version: concat!($version, "\0").as_ptr() as *const ::std::ffi::c_char,
                description: concat!($desc, "\0").as_ptr() as *const ::std::ffi::c_char,
                num_elements: __TRELLIS_ELEMENTS.len() as u32,
                elements: __TRELLIS_ELEMENTS.as_ptr(),
            };

        /// Plugin entry point.
        #[unsafe(no_mangle)]
        pub extern "C" fn trellis_plugin_descriptor() -> *const $crate::registry::PluginDescriptor {
            &__TRELLIS_PLUGIN
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, PadTemplate};
    use crate::caps::Caps;

    struct Sample;

    impl ElementImpl for Sample {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::sink(Caps::new_any())]
        }
    }

    crate::declare_plugin! {
        name: "sample",
        version: "2.1.0",
        description: "Test plugin",
        elements: [
            {
                name: "samplesink",
                klass: "Sink/Test",
                description: "Accepts anything",
                rank: Rank::Secondary,
                create: || Box::new(Sample),
            },
        ],
    }

    #[test]
    fn test_declared_descriptor_reads_back() {
        // SAFETY: the descriptor is a static generated above.
        let desc = unsafe { &*trellis_plugin_descriptor() };
        // SAFETY: as above.
        let info = unsafe { desc.read() }.unwrap();
        assert_eq!(info.name, "sample");
        assert_eq!(info.version, "2.1.0");
        assert_eq!(info.features.len(), 1);
        assert_eq!(info.features[0].name, "samplesink");
        assert_eq!(info.features[0].klass, "Sink/Test");
        assert_eq!(info.features[0].rank, Rank::Secondary);

        // SAFETY: as above.
        let create = unsafe { desc.elements() }[0].create;
        // SAFETY: generated constructors return element_to_raw pointers.
        let imp = unsafe { element_from_raw(create()) }.unwrap();
        let element = Element::from_boxed("p".into(), Some("samplesink".into()), imp, None);
        assert!(element.is_sink());
    }

    #[test]
    fn test_null_constructor_result() {
        unsafe extern "C" fn refuse() -> *mut c_void {
            std::ptr::null_mut()
        }
        let create: CreateElementFn = refuse;
        // SAFETY: null is accepted.
        assert!(unsafe { element_from_raw(create()) }.is_none());
    }

    #[test]
    fn test_abi_mismatch_refused() {
        let desc = PluginDescriptor {
            abi_version: TRELLIS_ABI_VERSION + 1,
            name: c"future".as_ptr(),
            version: std::ptr::null(),
            description: std::ptr::null(),
            num_elements: 0,
            elements: std::ptr::null(),
        };
        // SAFETY: all pointers are static or null.
        let err = unsafe { desc.read() }.unwrap_err();
        assert_eq!(
            err,
            PluginError::AbiMismatch {
                expected: TRELLIS_ABI_VERSION,
                actual: TRELLIS_ABI_VERSION + 1
            }
        );
    }
}
