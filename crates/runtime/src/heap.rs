//! The tagged value encoding and the copying garbage collector.
//!
//! The heap is a contiguous arena modeled as a `Vec<HeapObj>` indexed by
//! `HeapRef`, rather than raw bytes walked with pointer arithmetic: the
//! index is itself a forwarding-friendly handle, applied here to heap
//! objects the same way labels index the CPS graph's arena. Collection
//! is a textbook Cheney copy: a fresh `Vec` is the new tospace, a
//! worklist seeded by the roots drives the copy, and a forwarding map
//! records each moved object's new location.
//!
//! This is linked into emitted C as a `staticlib` and exposes the ABI
//! names the generated code calls (`scm_heap_init`, `scm_chk_heap`, …)
//! as `extern "C"` wrappers at the bottom of the file.

use std::collections::HashMap;

/// Every runtime value is one of these tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Void,
    Bool,
    Char,
    Int,
    Float,
    Null,
    Pair,
    Symbol,
    Str,
    Bytevector,
    Vector,
    Record,
    Box,
    Closure,
    Function,
}

impl Tag {
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Tag::Void | Tag::Bool | Tag::Char | Tag::Int | Tag::Float | Tag::Null | Tag::Symbol | Tag::Function
        )
    }
}

/// A tagged value: discriminant plus a 64-bit payload. For immediates the
/// payload holds the raw bits (sign-extended int, float bits, bool 0/1,
/// char byte, interned-symbol id, or code-pointer id). For heap tags it
/// holds a `HeapRef` index into the current tospace.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScmValue {
    pub tag: Tag,
    pub bits: u64,
}

impl ScmValue {
    pub const VOID: ScmValue = ScmValue { tag: Tag::Void, bits: 0 };
    pub const NULL: ScmValue = ScmValue { tag: Tag::Null, bits: 0 };

    pub fn bool(b: bool) -> Self {
        ScmValue { tag: Tag::Bool, bits: b as u64 }
    }
    pub fn int(i: i32) -> Self {
        ScmValue { tag: Tag::Int, bits: i as u32 as u64 }
    }
    pub fn float(f: f64) -> Self {
        ScmValue { tag: Tag::Float, bits: f.to_bits() }
    }
    pub fn char_(c: u8) -> Self {
        ScmValue { tag: Tag::Char, bits: c as u64 }
    }
    pub fn symbol(id: u32) -> Self {
        ScmValue { tag: Tag::Symbol, bits: id as u64 }
    }
    pub fn function(code_id: u32) -> Self {
        ScmValue { tag: Tag::Function, bits: code_id as u64 }
    }
    fn heap(tag: Tag, r: HeapRef) -> Self {
        ScmValue { tag, bits: r.0 as u64 }
    }

    pub fn as_int(self) -> Option<i32> {
        (self.tag == Tag::Int).then_some(self.bits as u32 as i32)
    }
    pub fn as_float(self) -> Option<f64> {
        (self.tag == Tag::Float).then_some(f64::from_bits(self.bits))
    }
    pub fn is_truthy(self) -> bool {
        !(self.tag == Tag::Bool && self.bits == 0)
    }
    pub fn heap_ref(self) -> Option<HeapRef> {
        (!self.tag.is_immediate()).then_some(HeapRef(self.bits as u32))
    }
}

/// A handle into the heap's current tospace. Stable only between
/// safepoints: collection only runs at continuation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(pub u32);

/// Heap-allocated object shapes.
#[derive(Debug, Clone)]
pub enum HeapObj {
    Pair(ScmValue, ScmValue),
    Str(std::rc::Rc<[u8]>),
    Bytevector(Vec<u8>),
    Vector(Vec<ScmValue>),
    Record { fields: Vec<ScmValue>, meta: ScmValue },
    BoxCell(ScmValue),
    Closure { code_id: u32, free_vars: Vec<ScmValue> },
}

impl HeapObj {
    /// Visit every embedded `ScmValue` that might itself be a heap
    /// reference, for the GC's copy/scan phases.
    fn for_each_ref_mut(&mut self, mut f: impl FnMut(&mut ScmValue)) {
        match self {
            HeapObj::Pair(a, b) => {
                f(a);
                f(b);
            }
            HeapObj::Str(_) | HeapObj::Bytevector(_) => {}
            HeapObj::Vector(vs) => vs.iter_mut().for_each(f),
            HeapObj::Record { fields, meta } => {
                fields.iter_mut().for_each(&mut f);
                f(meta);
            }
            HeapObj::BoxCell(v) => f(v),
            HeapObj::Closure { free_vars, .. } => free_vars.iter_mut().for_each(f),
        }
    }
}

/// The semispace copying heap. Allocation is a bump push onto `objects`,
/// "doubling" happens implicitly via `Vec`'s own growth; `threshold` is
/// a tunable collection trigger, compared against objects allocated
/// since the last collection (approximated here by object count since
/// we don't track raw byte sizes of a `Vec<HeapObj>`).
pub struct Heap {
    objects: Vec<HeapObj>,
    allocated_since_gc: usize,
    pub threshold: usize,
    pub collections: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Heap {
    pub fn new(threshold: usize) -> Self {
        Heap { objects: Vec::new(), allocated_since_gc: 0, threshold, collections: 0 }
    }

    /// Allocate an object. Does *not* itself trigger a collection: GC only
    /// runs at the well-defined safepoints of continuation entry, via
    /// `collect`/`scm_chk_heap`, never while a partially-built object's
    /// fields are sitting in locals that a mid-construction collection
    /// could silently move out from under.
    pub fn alloc(&mut self, obj: HeapObj) -> ScmValue {
        let tag = match &obj {
            HeapObj::Pair(..) => Tag::Pair,
            HeapObj::Str(_) => Tag::Str,
            HeapObj::Bytevector(_) => Tag::Bytevector,
            HeapObj::Vector(_) => Tag::Vector,
            HeapObj::Record { .. } => Tag::Record,
            HeapObj::BoxCell(_) => Tag::Box,
            HeapObj::Closure { .. } => Tag::Closure,
        };
        let idx = self.objects.len() as u32;
        self.objects.push(obj);
        self.allocated_since_gc += 1;
        ScmValue::heap(tag, HeapRef(idx))
    }

    pub fn get(&self, r: HeapRef) -> &HeapObj {
        &self.objects[r.0 as usize]
    }

    pub fn get_mut(&mut self, r: HeapRef) -> &mut HeapObj {
        &mut self.objects[r.0 as usize]
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Whether accumulated allocation since the last collection has
    /// crossed the tunable threshold — the emitted program consults this
    /// at a continuation's safepoint to decide whether to call
    /// `scm_chk_heap`.
    pub fn should_collect(&self) -> bool {
        self.allocated_since_gc >= self.threshold
    }

    /// Cheney-style copying collection. Roots are every `ScmValue` that
    /// might currently reference the heap: the argument stack and the
    /// current continuation pointer. Interned constants (symbols) never
    /// live in this heap, so they need no root-scanning.
    pub fn collect(&mut self, roots: &mut [&mut ScmValue]) {
        let mut new_objects: Vec<HeapObj> = Vec::with_capacity(self.objects.len());
        let mut forwarding: HashMap<u32, u32> = HashMap::new();
        let mut worklist: std::collections::VecDeque<u32> = std::collections::VecDeque::new();

        let mut copy_ref = |old: u32,
                            new_objects: &mut Vec<HeapObj>,
                            forwarding: &mut HashMap<u32, u32>,
                            worklist: &mut std::collections::VecDeque<u32>,
                            objects: &[HeapObj]| -> u32 {
            if let Some(&new_idx) = forwarding.get(&old) {
                return new_idx;
            }
            let new_idx = new_objects.len() as u32;
            new_objects.push(objects[old as usize].clone());
            forwarding.insert(old, new_idx);
            worklist.push_back(old);
            new_idx
        };

        for root in roots.iter_mut() {
            if let Some(r) = root.heap_ref() {
                let new_idx = copy_ref(r.0, &mut new_objects, &mut forwarding, &mut worklist, &self.objects);
                root.bits = new_idx as u64;
            }
        }

        while let Some(old) = worklist.pop_front() {
            let new_idx = forwarding[&old];
            // Scan the *copy* so we rewrite its embedded refs in place.
            let mut obj = new_objects[new_idx as usize].clone();
            obj.for_each_ref_mut(|v| {
                if let Some(r) = v.heap_ref() {
                    let new_child = copy_ref(r.0, &mut new_objects, &mut forwarding, &mut worklist, &self.objects);
                    v.bits = new_child as u64;
                }
            });
            new_objects[new_idx as usize] = obj;
        }

        self.objects = new_objects;
        self.allocated_since_gc = 0;
        self.collections += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_read_pair() {
        let mut heap = Heap::new(1024);
        let pair = heap.alloc(HeapObj::Pair(ScmValue::int(1), ScmValue::int(2)));
        match heap.get(pair.heap_ref().unwrap()) {
            HeapObj::Pair(a, b) => {
                assert_eq!(a.as_int(), Some(1));
                assert_eq!(b.as_int(), Some(2));
            }
            _ => panic!("expected pair"),
        }
    }

    #[test]
    fn gc_transparency_preserves_reachable_structure() {
        let mut heap = Heap::new(1);
        let pair = heap.alloc(HeapObj::Pair(ScmValue::int(42), ScmValue::int(7)));
        let mut root = pair;
        // force several collections via churn, keeping `root` alive each time
        for _ in 0..5 {
            heap.alloc(HeapObj::Bytevector(vec![0; 8]));
            heap.collect(&mut [&mut root]);
        }
        match heap.get(root.heap_ref().unwrap()) {
            HeapObj::Pair(a, b) => {
                assert_eq!(a.as_int(), Some(42));
                assert_eq!(b.as_int(), Some(7));
            }
            _ => panic!("root pair should survive collection"),
        }
    }

    #[test]
    fn unrooted_objects_are_dropped() {
        let mut heap = Heap::new(1);
        let mut root = ScmValue::VOID;
        heap.alloc(HeapObj::Pair(ScmValue::int(1), ScmValue::int(1)));
        // nothing rooted it, so a collection should reclaim it
        heap.collect(&mut [&mut root]);
        assert_eq!(heap.live_objects(), 0);
    }
}

// ---------------------------------------------------------------------
// C ABI
// ---------------------------------------------------------------------

use std::cell::RefCell;

thread_local! {
    static HEAP: RefCell<Heap> = RefCell::new(Heap::default());
}

/// `scm_heap_init` — allocate the initial semispaces.
#[unsafe(no_mangle)]
pub extern "C" fn scm_heap_init(initial_threshold: u64) {
    HEAP.with(|h| *h.borrow_mut() = Heap::new(initial_threshold as usize));
}

/// `scm_chk_heap` — run a collection if allocation pressure warrants it.
/// `roots_data`/`roots_len` describe the caller's live root array (the
/// argument stack, typically); the caller guarantees the pointer is
/// valid for `roots_len` elements for the duration of the call.
///
/// # Safety
/// `roots_data` must point to `roots_len` valid, initialized `ScmValue`s.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_chk_heap(roots_data: *mut ScmValue, roots_len: usize) {
    if roots_data.is_null() {
        return;
    }
    let slice = unsafe { std::slice::from_raw_parts_mut(roots_data, roots_len) };
    let mut refs: Vec<&mut ScmValue> = slice.iter_mut().collect();
    HEAP.with(|h| h.borrow_mut().collect(&mut refs));
}

/// Give other modules in this crate access to the thread-local heap
/// without exposing the `thread_local!` cell itself.
pub(crate) fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    HEAP.with(|h| f(&mut h.borrow_mut()))
}

/// `scm_code_value` — reify a registered `code_id` as an immediate,
/// capture-free callable `value`: a bare code pointer with no closure
/// record around it.
#[unsafe(no_mangle)]
pub extern "C" fn scm_code_value(code_id: u32) -> ScmValue {
    ScmValue::function(code_id)
}

/// `scm_make_string_literal` — allocate a `Str` from `len` raw bytes,
/// for a quoted string constant the emitter can't represent as an
/// immediate `value`.
///
/// # Safety
/// `bytes` must point to `len` valid, initialized bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_make_string_literal(bytes: *const u8, len: usize) -> ScmValue {
    let slice = if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(bytes, len) } };
    with_heap(|h| h.alloc(HeapObj::Str(std::rc::Rc::from(slice))))
}

/// `scm_make_bytevector_literal` — allocate a `Bytevector` from `len` raw
/// bytes, for a quoted bytevector constant.
///
/// # Safety
/// `bytes` must point to `len` valid, initialized bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_make_bytevector_literal(bytes: *const u8, len: usize) -> ScmValue {
    let slice = if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(bytes, len) } };
    with_heap(|h| h.alloc(HeapObj::Bytevector(slice.to_vec())))
}

/// `scm_make_vector_literal` — allocate a `Vector` from `len` already-built
/// element values, for a quoted vector constant. Elements are built by the
/// caller first (they may themselves be compound constants) and handed
/// over as a plain array, the same pointer+count shape as
/// `scm_make_closure`'s free-variable array.
///
/// # Safety
/// `items` must point to `len` valid, initialized `ScmValue`s.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_make_vector_literal(items: *const ScmValue, len: usize) -> ScmValue {
    let slice = if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(items, len) } };
    with_heap(|h| h.alloc(HeapObj::Vector(slice.to_vec())))
}
