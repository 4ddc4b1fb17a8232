//! Object layout shared by the collector and generated code
//!
//! Every heap object starts with an [`ObjectHeader`]. Pointer-sized field
//! slots follow the header back to back, and variable-length objects may
//! carry a trailing appendix (character data for strings).
//!
//! ```text
//! ┌────────┬────────┬──────────────┬─────────┬─────┬─────────┬──────────┐
//! │ mark   │ tag    │ size         │ field 0 │ ... │ field N │ appendix │
//! │ i32    │ i32    │ usize        │ word    │     │ word    │ bytes    │
//! └────────┴────────┴──────────────┴─────────┴─────┴─────────┴──────────┘
//! ```
//!
//! Objects built by the code generator use [`ObjectLayout`], where the first
//! field slot holds the address of the type's dispatch table. The collector
//! never distinguishes that slot from an ordinary field.

use std::mem::{offset_of, size_of};
use std::ptr::{self, NonNull};

/// Raw heap address, as handed to generated code.
pub type Address = *mut u8;

/// Width of one field slot in bytes.
pub const WORD_SIZE: usize = size_of::<Address>();

/// Size of [`ObjectHeader`] in bytes.
pub const HEADER_SIZE: usize = size_of::<ObjectHeader>();

/// Size of [`ObjectLayout`] (header plus dispatch table) in bytes.
pub const LAYOUT_HEADER_SIZE: usize = size_of::<ObjectLayout>();

/// Tag carried by free chunks.
pub const UNUSED_TAG: i32 = 0;

/// Object type tags.
///
/// Tags below [`ObjectType::Other`] are leaf types whose slots hold raw data
/// rather than references.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Boxed integer
    Integer = 1,
    /// Boxed boolean
    Boolean = 2,
    /// String with a character appendix
    String = 3,
    /// Generic object whose fields are all references
    Other = 4,
}

impl ObjectType {
    /// Tag value stored in the header.
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Decode a header tag. Returns `None` for free chunks and unknown tags.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::Integer),
            2 => Some(Self::Boolean),
            3 => Some(Self::String),
            4 => Some(Self::Other),
            _ => None,
        }
    }

    /// True for leaf types whose slots must not be traced.
    pub const fn is_special(self) -> bool {
        (self as i32) < Self::Other as i32
    }
}

/// Per-object runtime header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    mark: i32,
    tag: i32,
    size: usize,
}

impl ObjectHeader {
    /// Create an unmarked header.
    pub const fn new(tag: i32, size: usize) -> Self {
        Self { mark: 0, tag, size }
    }

    /// Check the mark word.
    pub fn is_marked(&self) -> bool {
        self.mark != 0
    }

    /// Set the mark word.
    pub fn set_marked(&mut self) {
        self.mark = 1;
    }

    /// Clear the mark word.
    pub fn unset_marked(&mut self) {
        self.mark = 0;
    }

    /// Turn the region into a free chunk of `size` bytes.
    pub fn set_unused(&mut self, size: usize) {
        self.size = size;
        self.mark = 0;
        self.tag = UNUSED_TAG;
    }

    /// True if the region is a free chunk.
    pub fn is_unused(&self) -> bool {
        self.tag == UNUSED_TAG
    }

    /// Object type tag.
    pub fn tag(&self) -> i32 {
        self.tag
    }

    /// Total object size, header included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of pointer-sized slots after the header.
    pub fn field_cnt(&self) -> usize {
        (self.size - HEADER_SIZE) / WORD_SIZE
    }

    /// True for leaf types (and free chunks).
    pub fn has_special_type(&self) -> bool {
        self.tag < ObjectType::Other.tag()
    }
}

/// Header plus dispatch table: the shape generated code expects.
#[repr(C)]
#[derive(Debug)]
pub struct ObjectLayout {
    /// Collector header
    pub header: ObjectHeader,
    /// Address of the type's method table
    pub dispatch_table: Address,
}

/// Immutable type descriptor shared by all objects of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Klass {
    fields_count: usize,
    ty: ObjectType,
}

impl Klass {
    /// Largest field count whose object size fits in an allocation.
    pub const MAX_FIELDS: usize = (isize::MAX as usize - HEADER_SIZE) / WORD_SIZE;

    /// Create a descriptor with `fields_count` pointer-sized fields.
    ///
    /// # Panics
    /// Panics if `fields_count > Klass::MAX_FIELDS`.
    pub const fn new(fields_count: usize, ty: ObjectType) -> Self {
        assert!(
            fields_count <= Self::MAX_FIELDS,
            "fields_count <= MAX_FIELDS failed"
        );
        Self { fields_count, ty }
    }

    /// Byte offset of field `field_num` from the object start.
    ///
    /// # Panics
    /// Panics if `field_num >= fields_count`.
    #[inline(always)]
    pub fn offset(&self, field_num: usize) -> usize {
        assert!(
            field_num < self.fields_count,
            "field_num < fields_count failed: field {field_num} of {}",
            self.fields_count
        );
        HEADER_SIZE + field_num * WORD_SIZE
    }

    /// Size of an object of this type.
    #[inline]
    pub const fn size(&self) -> usize {
        HEADER_SIZE + self.fields_count * WORD_SIZE
    }

    /// Size of an object carrying an `appendix` byte payload, rounded up to
    /// whole words. `None` if the size overflows.
    pub fn checked_size_with_appendix(&self, appendix: usize) -> Option<usize> {
        appendix
            .checked_next_multiple_of(WORD_SIZE)?
            .checked_add(self.size())
    }

    /// Number of fields.
    pub const fn fields_count(&self) -> usize {
        self.fields_count
    }

    /// Object type.
    pub const fn ty(&self) -> ObjectType {
        self.ty
    }
}

/// Typed view of a heap object (or free chunk) at a fixed address.
///
/// All raw-pointer access to object memory goes through this view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonNull<ObjectHeader>);

impl ObjectRef {
    /// Create a view of the region starting at `addr`.
    ///
    /// # Safety
    /// `addr` must be word-aligned and point at an initialized header inside
    /// a live heap arena, and the region must span the header's `size`.
    pub unsafe fn from_address(addr: Address) -> Self {
        // SAFETY: caller guarantees addr is a non-null header address
        Self(unsafe { NonNull::new_unchecked(addr.cast()) })
    }

    /// Start address of the object.
    pub fn address(self) -> Address {
        self.0.as_ptr().cast()
    }

    /// Copy of the header.
    pub fn header(self) -> ObjectHeader {
        // SAFETY: constructor contract
        unsafe { self.0.as_ptr().read() }
    }

    fn update(self, f: impl FnOnce(&mut ObjectHeader)) {
        // SAFETY: constructor contract; the borrow ends before returning
        f(unsafe { &mut *self.0.as_ptr() });
    }

    /// Install a fresh, unmarked header.
    pub fn init(self, tag: i32, size: usize) {
        self.update(|h| *h = ObjectHeader::new(tag, size));
    }

    /// Check the mark word.
    pub fn is_marked(self) -> bool {
        self.header().is_marked()
    }

    /// Set the mark word.
    pub fn set_marked(self) {
        self.update(ObjectHeader::set_marked);
    }

    /// Clear the mark word.
    pub fn unset_marked(self) {
        self.update(ObjectHeader::unset_marked);
    }

    /// Turn the region into a free chunk of `size` bytes.
    pub fn set_unused(self, size: usize) {
        self.update(|h| h.set_unused(size));
    }

    /// True if the region is a free chunk.
    pub fn is_unused(self) -> bool {
        self.header().is_unused()
    }

    /// Object type tag.
    pub fn tag(self) -> i32 {
        self.header().tag()
    }

    /// Total object size.
    pub fn size(self) -> usize {
        self.header().size()
    }

    /// Number of pointer-sized slots after the header.
    pub fn field_cnt(self) -> usize {
        self.header().field_cnt()
    }

    /// True for leaf types.
    pub fn has_special_type(self) -> bool {
        self.header().has_special_type()
    }

    /// Address of the first field slot.
    pub fn fields_base(self) -> *mut Address {
        // SAFETY: the header is followed by the field region
        unsafe { self.address().add(HEADER_SIZE).cast() }
    }

    /// Read field `i` as a raw word.
    ///
    /// # Panics
    /// Panics if `i >= field_cnt()`.
    pub fn field(self, i: usize) -> Address {
        assert!(i < self.field_cnt(), "field index {i} out of range");
        // SAFETY: bounds checked against the header size
        unsafe { self.fields_base().add(i).read() }
    }

    /// Write field `i`.
    ///
    /// # Panics
    /// Panics if `i >= field_cnt()`.
    pub fn set_field(self, i: usize, value: Address) {
        assert!(i < self.field_cnt(), "field index {i} out of range");
        // SAFETY: bounds checked against the header size
        unsafe { self.fields_base().add(i).write(value) }
    }

    /// Fill the whole field region with `val`.
    pub fn zero_fields(self, val: u8) {
        let len = self.size() - HEADER_SIZE;
        // SAFETY: [fields_base, fields_base + len) lies inside the object
        unsafe { ptr::write_bytes(self.fields_base().cast::<u8>(), val, len) }
    }

    /// Zero the trailing `appendix_size` bytes.
    ///
    /// # Panics
    /// Panics if the appendix would overlap the header.
    pub fn zero_appendix(self, appendix_size: usize) {
        let size = self.size();
        assert!(
            appendix_size <= size - HEADER_SIZE,
            "appendix of {appendix_size} bytes overlaps the header"
        );
        // SAFETY: the range ends at the object end and starts after the header
        unsafe { ptr::write_bytes(self.address().add(size - appendix_size), 0, appendix_size) }
    }

    /// Address just past this region.
    pub fn next(self) -> Address {
        self.address().wrapping_add(self.size())
    }

    /// Print the header and every slot.
    #[cfg(debug_assertions)]
    pub fn dump(self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        let header = self.header();
        writeln!(out, "Address = {:x}", self.address() as usize)?;
        writeln!(out, "Mark = {:x}", header.mark)?;
        writeln!(out, "Tag = {:x}", header.tag)?;
        writeln!(out, "Size = {}", header.size)?;
        for i in 0..header.field_cnt() {
            writeln!(out, "Field {i} : {:x}", self.field(i) as usize)?;
        }
        writeln!(out)
    }
}

/// View of an object in generated-code shape.
///
/// The owning [`Klass`] counts the dispatch table as its first field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRef(ObjectRef);

impl LayoutRef {
    /// Wrap an object that is large enough to hold a dispatch table.
    ///
    /// # Panics
    /// Panics if the object is smaller than [`LAYOUT_HEADER_SIZE`].
    pub fn new(obj: ObjectRef) -> Self {
        assert!(
            obj.size() >= LAYOUT_HEADER_SIZE,
            "object of {} bytes cannot hold a dispatch table",
            obj.size()
        );
        Self(obj)
    }

    /// Underlying object.
    pub fn object(self) -> ObjectRef {
        self.0
    }

    fn dispatch_slot(self) -> *mut Address {
        // SAFETY: size checked in `new`
        unsafe {
            self.0
                .address()
                .add(offset_of!(ObjectLayout, dispatch_table))
                .cast()
        }
    }

    /// Dispatch table address.
    pub fn dispatch_table(self) -> Address {
        // SAFETY: size checked in `new`
        unsafe { self.dispatch_slot().read() }
    }

    /// Install the dispatch table.
    pub fn set_dispatch_table(self, table: Address) {
        // SAFETY: size checked in `new`
        unsafe { self.dispatch_slot().write(table) }
    }

    /// Address of the first field after the dispatch table.
    pub fn fields_base(self) -> *mut Address {
        // SAFETY: size checked in `new`
        unsafe { self.0.address().add(LAYOUT_HEADER_SIZE).cast() }
    }

    /// Number of fields after the dispatch table.
    pub fn field_cnt(self) -> usize {
        (self.0.size() - LAYOUT_HEADER_SIZE) / WORD_SIZE
    }

    /// Fill the fields after the dispatch table with `val`.
    pub fn zero_fields(self, val: u8) {
        let len = self.0.size() - LAYOUT_HEADER_SIZE;
        // SAFETY: [fields_base, fields_base + len) lies inside the object
        unsafe { ptr::write_bytes(self.fields_base().cast::<u8>(), val, len) }
    }

    /// Zero the trailing `appendix_size` bytes.
    pub fn zero_appendix(self, appendix_size: usize) {
        assert!(
            appendix_size <= self.0.size() - LAYOUT_HEADER_SIZE,
            "appendix of {appendix_size} bytes overlaps the dispatch table"
        );
        self.0.zero_appendix(appendix_size);
    }

    /// Print address, header, dispatch table and every field.
    #[cfg(debug_assertions)]
    pub fn dump(self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        let header = self.0.header();
        writeln!(out, "Address = {:x}", self.0.address() as usize)?;
        writeln!(out, "Mark = {:x}", header.mark)?;
        writeln!(out, "Tag = {:x}", header.tag)?;
        writeln!(out, "Size = {}", header.size)?;
        writeln!(out, "DispTable = {:x}", self.dispatch_table() as usize)?;
        for i in 0..self.field_cnt() {
            // SAFETY: i < field_cnt
            let value = unsafe { self.fields_base().add(i).read() };
            writeln!(out, "Field {i} : {:x}", value as usize)?;
        }
        writeln!(out)
    }
}
