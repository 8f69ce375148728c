//! Lexical frames: the slot array backing one activation of a script or
//! lambda.
//!
//! The prepare pass assigns every declared local and parameter a slot and
//! records per-slot properties in a [`FrameTemplate`]. At runtime a
//! [`Frame`] holds one cell per slot plus a flag byte tracking declaration,
//! assignment, const-ness and capture.
//!
//! Variables captured by inner lambdas are stored behind `Rc<RefCell<_>>`
//! cells so a closure and its defining frame can share the same storage
//! (unless const-capture freezes the closure's copy at creation time).

use std::{cell::RefCell, rc::Rc, sync::Arc};

use smallvec::SmallVec;

use crate::value::{CaptureCell, Value};

/// Index of a slot within its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(pub(crate) u16);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-slot flag bits.
pub(crate) mod flags {
    /// The declaring statement has executed.
    pub const DECLARED: u8 = 1 << 0;
    /// The slot holds a value.
    pub const ASSIGNED: u8 = 1 << 1;
    /// Declared `const`; assignment after initialization fails.
    pub const CONST: u8 = 1 << 2;
    /// Captured by an inner lambda; storage is a shared cell.
    pub const CELL: u8 = 1 << 3;
}

/// Where a closure finds one of its capture cells at creation time: a slot
/// of the immediately enclosing frame. Transitive captures are flattened by
/// the prepare pass, so one level is always enough.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CaptureSpec {
    /// Slot in the enclosing frame (always a cell slot).
    pub source: SlotId,
    /// Slot in the lambda's own frame receiving the cell.
    pub dest: SlotId,
}

/// Parse-time description of a frame: slot names, parameter count, initial
/// flags and the captures to install when a closure is created.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameTemplate {
    names: Vec<Arc<str>>,
    init_flags: Vec<u8>,
    param_count: u16,
    pub captures: Vec<CaptureSpec>,
}

impl FrameTemplate {
    /// Reserves a new slot for `name`. Shadowing declarations get distinct
    /// slots, so duplicate names are fine.
    pub fn declare(&mut self, name: Arc<str>, constant: bool) -> SlotId {
        let id = SlotId(u16::try_from(self.names.len()).expect("frame exceeds 65535 slots"));
        self.names.push(name);
        self.init_flags.push(if constant { flags::CONST } else { 0 });
        id
    }

    /// Marks a slot as captured; its storage becomes a shared cell.
    pub fn mark_cell(&mut self, slot: SlotId) {
        self.init_flags[slot.index()] |= flags::CELL;
    }

    pub fn set_param_count(&mut self, count: u16) {
        self.param_count = count;
    }

    pub fn param_count(&self) -> u16 {
        self.param_count
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    /// Parameter names, in declaration order.
    pub fn parameters(&self) -> impl Iterator<Item = &Arc<str>> {
        self.names.iter().take(self.param_count as usize)
    }

    /// Declared locals that are not parameters.
    pub fn locals(&self) -> impl Iterator<Item = &Arc<str>> {
        self.names.iter().skip(self.param_count as usize)
    }

    pub fn is_const(&self, slot: SlotId) -> bool {
        self.init_flags[slot.index()] & flags::CONST != 0
    }
}

/// Storage for one slot.
#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Plain(Value),
    Cell(Rc<RefCell<Value>>),
}

/// Outcome of a frame write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetOutcome {
    Ok,
    /// The slot is const and already initialized.
    ConstViolation,
}

/// One activation's slot array.
#[derive(Debug)]
pub(crate) struct Frame {
    slots: SmallVec<[Slot; 8]>,
    flags: SmallVec<[u8; 8]>,
}

impl Frame {
    /// Creates a frame from its template. Cell slots get fresh cells so
    /// closures created before assignment still share storage.
    pub fn new(template: &FrameTemplate) -> Self {
        let mut slots = SmallVec::with_capacity(template.size());
        let mut fl = SmallVec::with_capacity(template.size());
        for &init in &template.init_flags {
            if init & flags::CELL != 0 {
                slots.push(Slot::Cell(Rc::new(RefCell::new(Value::Null))));
            } else {
                slots.push(Slot::Empty);
            }
            fl.push(init);
        }
        Self { slots, flags: fl }
    }

    /// Reads a slot; `None` when the slot was never assigned.
    pub fn get(&self, slot: SlotId) -> Option<Value> {
        if self.flags[slot.index()] & flags::ASSIGNED == 0 {
            return None;
        }
        match &self.slots[slot.index()] {
            Slot::Empty => None,
            Slot::Plain(v) => Some(v.clone()),
            Slot::Cell(cell) => Some(cell.borrow().clone()),
        }
    }

    /// Writes a slot, honoring const slots.
    pub fn set(&mut self, slot: SlotId, value: Value) -> SetOutcome {
        let idx = slot.index();
        let fl = self.flags[idx];
        if fl & flags::CONST != 0 && fl & flags::ASSIGNED != 0 {
            return SetOutcome::ConstViolation;
        }
        match &mut self.slots[idx] {
            Slot::Cell(cell) => *cell.borrow_mut() = value,
            slot_ref => *slot_ref = Slot::Plain(value),
        }
        self.flags[idx] |= flags::ASSIGNED | flags::DECLARED;
        SetOutcome::Ok
    }

    /// Marks a slot declared without assigning (a `var x;` with no init).
    pub fn declare(&mut self, slot: SlotId) {
        self.flags[slot.index()] |= flags::DECLARED;
    }

    pub fn is_declared(&self, slot: SlotId) -> bool {
        self.flags[slot.index()] & flags::DECLARED != 0
    }

    pub fn is_assigned(&self, slot: SlotId) -> bool {
        self.flags[slot.index()] & flags::ASSIGNED != 0
    }

    /// Drops declaration state for a block's slots when the block exits, so
    /// re-entering the block (loop bodies) can declare them afresh.
    pub fn undeclare(&mut self, slot: SlotId) {
        let idx = slot.index();
        self.flags[idx] &= !(flags::DECLARED | flags::ASSIGNED);
        if let Slot::Cell(_) = &self.slots[idx] {
            // a fresh cell per block entry keeps previously created
            // closures pointing at the old iteration's value
            self.slots[idx] = Slot::Cell(Rc::new(RefCell::new(Value::Null)));
        } else {
            self.slots[idx] = Slot::Empty;
        }
    }

    /// Extracts the shared cell behind a captured slot.
    pub fn capture(&self, slot: SlotId) -> Rc<RefCell<Value>> {
        match &self.slots[slot.index()] {
            Slot::Cell(cell) => Rc::clone(cell),
            _ => unreachable!("capture source slots are always cells"),
        }
    }

    /// Installs a capture cell into a lambda frame at call time.
    pub fn install_capture(&mut self, dest: SlotId, cell: &CaptureCell) {
        let idx = dest.index();
        match cell {
            CaptureCell::Shared(rc) => {
                self.slots[idx] = Slot::Cell(Rc::clone(rc));
                self.flags[idx] |= flags::DECLARED | flags::ASSIGNED | flags::CELL;
            }
            CaptureCell::Frozen(value) => {
                self.slots[idx] = Slot::Plain(value.clone());
                self.flags[idx] |= flags::DECLARED | flags::ASSIGNED | flags::CONST;
            }
        }
    }
}
