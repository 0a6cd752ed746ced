//! Address types for physical and virtual memory management.
//!
//! This module provides architecture-independent wrappers around physical and virtual
//! addresses, and the [`AddressTranslator`] the kernel uses to reach physical memory
//! (page tables and user frames) through its direct map.

use core::fmt;
use core::ops::Add;

use crate::layout;

#[cfg(emulated)]
use crate::arch::EmulatedMemory;

/// Address translator for converting between physical and kernel-virtual addresses.
///
/// This enum supports two modes:
/// - Hardware: physical memory is direct-mapped at a fixed offset (kernel mode)
/// - Emulated: physical memory is a host buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(emulated)]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator backed by `size` bytes of physical memory.
    #[cfg(emulated)]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(emulated))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(emulated)]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(emulated))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(emulated)]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: We leak the reference to make it 'static. Each thread has its
                    // own ADDRESS_TRANSLATOR, it is never modified once set (spin::Once), and
                    // the thread-local lives for the entire duration of the thread.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to a kernel-virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(emulated)]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a kernel-virtual address to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(emulated)]
            Self::Emulated(mem) => mem.ptr_to_phys(virt as *const u8),
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        self.phys_to_virt(phys.as_usize()) as *mut T
    }

    /// Allocates one zeroed, page-aligned physical frame.
    ///
    /// On hardware, frames come from the kernel heap, which lives inside the direct map.
    /// Returns None when memory is exhausted.
    pub fn allocate_frame(&self) -> Option<PhysicalAddress> {
        match self {
            Self::Hardware { .. } => {
                // SAFETY: The layout has a non-zero size.
                let ptr = unsafe { alloc::alloc::alloc_zeroed(frame_layout()) };
                if ptr.is_null() {
                    return None;
                }
                Some(PhysicalAddress::new(self.virt_to_phys(ptr as usize)))
            }
            #[cfg(emulated)]
            Self::Emulated(mem) => mem.allocate_frame().map(PhysicalAddress::new),
        }
    }

    /// Returns a frame obtained from [`AddressTranslator::allocate_frame`].
    pub fn deallocate_frame(&self, frame: PhysicalAddress) {
        debug_assert!(frame.is_aligned(layout::PAGE_SIZE), "frame must be page-aligned");
        match self {
            Self::Hardware { .. } => {
                let ptr = self.phys_to_ptr::<u8>(frame);
                // SAFETY: Hardware frames are only ever handed out by `allocate_frame`,
                // which used the same layout.
                unsafe { alloc::alloc::dealloc(ptr, frame_layout()) }
            }
            #[cfg(emulated)]
            Self::Emulated(mem) => mem.deallocate_frame(frame.as_usize()),
        }
    }

    /// Returns the emulated memory behind this translator, if any.
    #[cfg(emulated)]
    pub fn emulated_memory(&self) -> Option<&EmulatedMemory> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => Some(mem),
        }
    }
}

fn frame_layout() -> core::alloc::Layout {
    // PAGE_SIZE is a non-zero power of two, so this never fails.
    match core::alloc::Layout::from_size_align(layout::PAGE_SIZE, layout::PAGE_SIZE) {
        Ok(layout) => layout,
        Err(_) => unreachable!(),
    }
}

/// Global address translator.
///
/// This is initialized once during kernel initialization (with Hardware variant).
/// In emulated builds, this is thread-local to allow each test to have its own
/// emulated memory space.
#[cfg(not(emulated))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(emulated)]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses are at most 32 bits wide; PAE is not supported."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            layout::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }
}

impl_address_common!(
    VirtualAddress,
    "A 32-bit linear address.\n\n\
     Provides the directory and table indices used to walk the two-level page table."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit in 32 bits.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            layout::validate_virtual(addr),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the offset of this address within its page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (layout::PAGE_SIZE - 1)
    }

    /// Returns the page directory index of this address.
    #[inline]
    pub const fn directory_index(self) -> usize {
        layout::directory_index(self.0)
    }

    /// Returns the page table index of this address.
    #[inline]
    pub const fn table_index(self) -> usize {
        layout::table_index(self.0)
    }

    /// Returns true if this address belongs to user space.
    #[inline]
    pub const fn is_user(self) -> bool {
        layout::is_user(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KERNBASE, PAGE_SIZE};

    mod physical_address {
        use super::*;

        #[test]
        fn new_max_valid_address() {
            let addr = PhysicalAddress::new(layout::MAX_PHYSICAL_ADDRESS);
            assert_eq!(addr.as_usize(), layout::MAX_PHYSICAL_ADDRESS);
        }

        #[cfg(target_pointer_width = "64")]
        #[test]
        #[should_panic(expected = "physical address exceeds maximum width")]
        fn new_exceeds_max() {
            PhysicalAddress::new(layout::MAX_PHYSICAL_ADDRESS + 1);
        }

        #[test]
        fn alignment_check() {
            let addr = PhysicalAddress::new(PAGE_SIZE * 4);
            assert!(addr.is_aligned(PAGE_SIZE));
            assert!(addr.is_aligned(1));
            assert!(!addr.is_aligned(PAGE_SIZE * 8));
        }

        #[test]
        fn debug_format() {
            let addr = PhysicalAddress::new(0x1000);
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x1000)");
            assert_eq!(format!("{}", addr), "0x1000");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn indices() {
            let addr = VirtualAddress::new(0x0040_3123);
            assert_eq!(addr.directory_index(), 1);
            assert_eq!(addr.table_index(), 3);
            assert_eq!(addr.page_offset(), 0x123);
        }

        #[test]
        fn user_boundary() {
            assert!(VirtualAddress::new(KERNBASE - 1).is_user());
            assert!(!VirtualAddress::new(KERNBASE).is_user());
        }
    }

    mod direct_mapping {
        use super::*;

        fn setup_offset() {
            if AddressTranslator::try_current().is_none() {
                AddressTranslator::set_current(AddressTranslator::hardware(KERNBASE));
            }
        }

        #[test]
        fn round_trip_conversion() {
            setup_offset();
            let translator = AddressTranslator::current();
            let virt = translator.phys_to_virt(0x0010_0000);
            assert_eq!(virt, KERNBASE + 0x0010_0000);
            assert_eq!(translator.virt_to_phys(virt), 0x0010_0000);
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::hardware(KERNBASE));
            AddressTranslator::set_current(AddressTranslator::hardware(KERNBASE)); // Should panic
        }
    }
}
