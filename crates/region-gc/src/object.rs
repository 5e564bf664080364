//! Object model seam.
//!
//! The collector never interprets object layouts itself. Everything it needs
//! (size, reference fields, the mark word used for forwarding) goes through
//! [`ObjectModel`]. [`SimpleObjectModel`] is a compact two-word-header layout
//! used by the tests and benchmarks.

use crate::addr::Addr;

const TAG_MASK: usize = 0b11;
const NEUTRAL_TAG: usize = 0b01;
const FORWARDED_TAG: usize = 0b11;
const HASH_SHIFT: usize = 8;

/// The header word of an object.
///
/// A neutral mark word carries no information and can be rebuilt with
/// [`MarkWord::NEUTRAL`]. Anything else (hash codes, lock state) must be
/// preserved when the header is overwritten with a forwarding pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct MarkWord(usize);

impl MarkWord {
    /// Mark word of a freshly allocated object.
    pub const NEUTRAL: Self = Self(NEUTRAL_TAG);

    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// A neutral mark word carrying an identity hash.
    #[must_use]
    pub const fn with_hash(hash: usize) -> Self {
        Self((hash << HASH_SHIFT) | NEUTRAL_TAG)
    }

    /// A mark word encoding a forwarding pointer to `dest`.
    #[must_use]
    pub const fn forwarded(dest: Addr) -> Self {
        debug_assert!(dest.as_usize() & TAG_MASK == 0);
        Self(dest.as_usize() | FORWARDED_TAG)
    }

    #[must_use]
    pub const fn is_neutral(self) -> bool {
        self.0 == NEUTRAL_TAG
    }

    #[must_use]
    pub const fn is_forwarded(self) -> bool {
        self.0 & TAG_MASK == FORWARDED_TAG
    }

    /// The forwarding destination, if this mark word is a forwarding pointer.
    #[must_use]
    pub const fn forwardee(self) -> Option<Addr> {
        if self.is_forwarded() {
            Some(Addr::new(self.0 & !TAG_MASK))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn hash(self) -> usize {
        self.0 >> HASH_SHIFT
    }

    /// Whether overwriting this mark word loses information.
    #[must_use]
    pub const fn must_be_preserved(self) -> bool {
        !self.is_neutral() && !self.is_forwarded()
    }
}

/// Layout services the collector needs from the runtime.
///
/// Every method taking an object address requires that the address is the
/// start of a valid object in committed heap memory.
pub trait ObjectModel: Send + Sync {
    /// Size of the object in words.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn size_words(&self, obj: Addr) -> usize;

    /// Call `f` with the address of every reference slot in the object.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn for_each_ref_slot(&self, obj: Addr, f: &mut dyn FnMut(Addr));

    /// Read the header word.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn mark_word(&self, obj: Addr) -> MarkWord;

    /// Overwrite the header word.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn set_mark_word(&self, obj: Addr, mark: MarkWord);

    /// Smallest object [`ObjectModel::fill_with_object`] can create.
    fn min_fill_words(&self) -> usize;

    /// Format `[start, start + words)` as one or more dead filler objects.
    ///
    /// # Safety
    ///
    /// The range must be committed heap memory not used by live objects,
    /// and `words >= min_fill_words()`.
    unsafe fn fill_with_object(&self, start: Addr, words: usize);

    /// Install a forwarding pointer in the header.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn forward_to(&self, obj: Addr, dest: Addr) {
        unsafe { self.set_mark_word(obj, MarkWord::forwarded(dest)) };
    }

    /// Forwarding destination recorded in the header, if any.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn forwardee(&self, obj: Addr) -> Option<Addr> {
        unsafe { self.mark_word(obj) }.forwardee()
    }

    /// Reset the header to the neutral state.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    unsafe fn init_mark(&self, obj: Addr) {
        unsafe { self.set_mark_word(obj, MarkWord::NEUTRAL) };
    }
}

/// A two-word header layout.
///
/// ```text
/// word 0: mark word
/// word 1: size in words (high 32 bits) | reference count (low 32 bits)
/// word 2..2+refs: reference slots, 0 for null
/// rest: payload
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleObjectModel;

impl SimpleObjectModel {
    /// Header size in words.
    pub const HEADER_WORDS: usize = 2;
    const MAX_CHUNK: usize = u32::MAX as usize;

    /// Write a fresh header for an object of `size_words` words with
    /// `num_refs` null reference slots.
    ///
    /// # Safety
    ///
    /// `[obj, obj + size_words)` must be committed heap memory owned by the
    /// caller.
    pub unsafe fn init_object(&self, obj: Addr, size_words: usize, num_refs: usize) {
        assert!(size_words >= Self::HEADER_WORDS + num_refs, "object too small");
        assert!(size_words <= Self::MAX_CHUNK && num_refs <= Self::MAX_CHUNK);
        unsafe {
            obj.store(MarkWord::NEUTRAL.raw());
            obj.add_words(1).store((size_words << 32) | num_refs);
            for i in 0..num_refs {
                obj.add_words(Self::HEADER_WORDS + i).store(0);
            }
        }
    }

    /// Number of reference slots.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    #[must_use]
    pub unsafe fn num_refs(&self, obj: Addr) -> usize {
        unsafe { obj.add_words(1).load() & 0xffff_ffff }
    }

    /// Address of reference slot `index`.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    #[must_use]
    pub unsafe fn ref_slot(&self, obj: Addr, index: usize) -> Addr {
        debug_assert!(index < unsafe { self.num_refs(obj) });
        obj.add_words(Self::HEADER_WORDS + index)
    }

    /// Store `target` into reference slot `index`.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    pub unsafe fn set_ref(&self, obj: Addr, index: usize, target: Addr) {
        unsafe { self.ref_slot(obj, index).store(target.as_usize()) };
    }

    /// Load reference slot `index`.
    ///
    /// # Safety
    ///
    /// `obj` must be the start of a valid object.
    #[must_use]
    pub unsafe fn get_ref(&self, obj: Addr, index: usize) -> Addr {
        Addr::new(unsafe { self.ref_slot(obj, index).load() })
    }
}

impl ObjectModel for SimpleObjectModel {
    unsafe fn size_words(&self, obj: Addr) -> usize {
        unsafe { obj.add_words(1).load() >> 32 }
    }

    unsafe fn for_each_ref_slot(&self, obj: Addr, f: &mut dyn FnMut(Addr)) {
        let refs = unsafe { self.num_refs(obj) };
        for i in 0..refs {
            f(obj.add_words(Self::HEADER_WORDS + i));
        }
    }

    unsafe fn mark_word(&self, obj: Addr) -> MarkWord {
        MarkWord::from_raw(unsafe { obj.load() })
    }

    unsafe fn set_mark_word(&self, obj: Addr, mark: MarkWord) {
        unsafe { obj.store(mark.raw()) };
    }

    fn min_fill_words(&self) -> usize {
        Self::HEADER_WORDS
    }

    unsafe fn fill_with_object(&self, start: Addr, words: usize) {
        let mut cur = start;
        let mut remaining = words;
        while remaining > 0 {
            let mut chunk = remaining.min(Self::MAX_CHUNK);
            // Never leave a tail too small to hold a header.
            if remaining - chunk != 0 && remaining - chunk < Self::HEADER_WORDS {
                chunk -= Self::HEADER_WORDS;
            }
            unsafe { self.init_object(cur, chunk, 0) };
            cur = cur.add_words(chunk);
            remaining -= chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_word_states() {
        assert!(MarkWord::NEUTRAL.is_neutral());
        assert!(!MarkWord::NEUTRAL.must_be_preserved());

        let hashed = MarkWord::with_hash(0xabc);
        assert!(!hashed.is_neutral());
        assert!(hashed.must_be_preserved());
        assert_eq!(hashed.hash(), 0xabc);

        let fwd = MarkWord::forwarded(Addr::new(0x1000));
        assert!(fwd.is_forwarded());
        assert!(!fwd.must_be_preserved());
        assert_eq!(fwd.forwardee(), Some(Addr::new(0x1000)));
        assert_eq!(hashed.forwardee(), None);
    }

    #[test]
    fn simple_layout() {
        let mut backing = vec![0usize; 16];
        let obj = Addr::new(backing.as_mut_ptr() as usize);
        let model = SimpleObjectModel;
        unsafe {
            model.init_object(obj, 6, 2);
            assert_eq!(model.size_words(obj), 6);
            assert_eq!(model.num_refs(obj), 2);
            assert!(model.mark_word(obj).is_neutral());

            let target = obj.add_words(8);
            model.set_ref(obj, 1, target);
            assert_eq!(model.get_ref(obj, 1), target);
            assert!(model.get_ref(obj, 0).is_null());

            let mut slots = Vec::new();
            model.for_each_ref_slot(obj, &mut |slot| slots.push(slot));
            assert_eq!(slots, vec![obj.add_words(2), obj.add_words(3)]);

            model.forward_to(obj, target);
            assert_eq!(model.forwardee(obj), Some(target));
            model.init_mark(obj);
            assert_eq!(model.forwardee(obj), None);
        }
    }

    #[test]
    fn filler_is_walkable() {
        let mut backing = vec![0usize; 8];
        let start = Addr::new(backing.as_mut_ptr() as usize);
        let model = SimpleObjectModel;
        unsafe {
            model.fill_with_object(start, 8);
            assert_eq!(model.size_words(start), 8);
            assert_eq!(model.num_refs(start), 0);
        }
    }
}
