// SPDX-License-Identifier: GPL-3.0-or-later

//! Compile-time tunables.
//!
//! The reference implementation hard-codes these as C preprocessor macros;
//! none of them are meant to be configurable by an end user, so they stay
//! `const` here too rather than growing into a configuration file.

/// Maximum number of live call frames.
pub const FRAMES_MAX: usize = 64;

/// Maximum number of value-stack slots per frame; the total stack is
/// `FRAMES_MAX * STACK_SLOTS_PER_FRAME`.
pub const STACK_SLOTS_PER_FRAME: usize = 256;

/// Total size of the VM's value stack.
pub const STACK_MAX: usize = FRAMES_MAX * STACK_SLOTS_PER_FRAME;

/// A chunk's constant pool never exceeds this many entries; constant
/// operands are a single byte.
pub const MAX_CONSTANTS: usize = 256;

/// Maximum number of locals (and, separately, upvalues) a single function
/// may declare; both are single-byte operands.
pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;

/// Maximum number of positional arguments a call or function declaration
/// may have.
pub const MAX_ARGS: usize = 255;

/// Initial hash-table capacity, and the geometric growth factor applied
/// when the load factor is exceeded.
pub const TABLE_INITIAL_CAPACITY: usize = 8;
pub const TABLE_GROWTH_FACTOR: usize = 2;
pub const TABLE_MAX_LOAD: f64 = 0.75;

/// Initial chunk/value-array capacity, and its growth factor.
pub const CHUNK_INITIAL_CAPACITY: usize = 8;
pub const CHUNK_GROWTH_NUMERATOR: usize = 3;
pub const CHUNK_GROWTH_DENOMINATOR: usize = 2;

/// Collections are triggered once `bytes_allocated` exceeds `next_gc`.
/// `next_gc` grows by this factor after every collection, floored at
/// `GC_HEAP_MIN_BYTES`.
pub const GC_HEAP_GROW_FACTOR: f64 = 1.5;
pub const GC_HEAP_MIN_BYTES: usize = 1024 * 1024;

/// Assumed pointer width, in bits, for the NaN-boxed `Value` encoding's
/// sign-bit/pointer packing. The reference assumes 48-bit virtual
/// addresses without naming the assumption; this implementation names it
/// explicitly (see `Value::nan_boxed_pointer_mask`).
pub const NAN_BOX_POINTER_BITS: u32 = 48;
