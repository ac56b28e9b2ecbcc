// Scalar argument packing for deferred calls
//
// Arguments are flattened into 32-bit slots: up to 4 bytes takes one
// slot, 8-byte values take two (low word first). Slot and argument
// counts are associated consts so a call can be rejected before
// anything is allocated.

use alloc::vec::Vec;

pub type Slot = u32;

pub trait PackArg: Copy + 'static {
    const SLOTS: usize;
    fn pack(self, out: &mut Vec<Slot>);
    /// `slots.len() == Self::SLOTS`
    fn unpack(slots: &[Slot]) -> Self;
}

macro_rules! narrow_arg {
    ($($t:ty => $u:ty),* $(,)?) => {$(
        impl PackArg for $t {
            const SLOTS: usize = 1;

            fn pack(self, out: &mut Vec<Slot>) {
                out.push(self as $u as Slot);
            }

            fn unpack(slots: &[Slot]) -> Self {
                slots[0] as $u as $t
            }
        }
    )*};
}

narrow_arg!(u8 => u8, i8 => u8, u16 => u16, i16 => u16, u32 => u32, i32 => u32);

fn push_u64(v: u64, wide: bool, out: &mut Vec<Slot>) {
    out.push(v as Slot);
    if wide {
        out.push((v >> 32) as Slot);
    }
}

fn read_u64(slots: &[Slot]) -> u64 {
    let lo = slots[0] as u64;
    let hi = slots.get(1).map_or(0, |&w| w as u64);
    lo | (hi << 32)
}

impl PackArg for u64 {
    const SLOTS: usize = 2;

    fn pack(self, out: &mut Vec<Slot>) {
        push_u64(self, true, out);
    }

    fn unpack(slots: &[Slot]) -> Self {
        read_u64(slots)
    }
}

impl PackArg for i64 {
    const SLOTS: usize = 2;

    fn pack(self, out: &mut Vec<Slot>) {
        push_u64(self as u64, true, out);
    }

    fn unpack(slots: &[Slot]) -> Self {
        read_u64(slots) as i64
    }
}

impl PackArg for f64 {
    const SLOTS: usize = 2;

    fn pack(self, out: &mut Vec<Slot>) {
        push_u64(self.to_bits(), true, out);
    }

    fn unpack(slots: &[Slot]) -> Self {
        f64::from_bits(read_u64(slots))
    }
}

// pointer sized: one slot on the MCU, two on a 64-bit host
const WORD_SLOTS: usize = if size_of::<usize>() > 4 { 2 } else { 1 };

impl PackArg for usize {
    const SLOTS: usize = WORD_SLOTS;

    fn pack(self, out: &mut Vec<Slot>) {
        push_u64(self as u64, WORD_SLOTS == 2, out);
    }

    fn unpack(slots: &[Slot]) -> Self {
        read_u64(slots) as usize
    }
}

impl PackArg for isize {
    const SLOTS: usize = WORD_SLOTS;

    fn pack(self, out: &mut Vec<Slot>) {
        push_u64(self as i64 as u64, WORD_SLOTS == 2, out);
    }

    fn unpack(slots: &[Slot]) -> Self {
        if WORD_SLOTS == 2 {
            read_u64(slots) as i64 as isize
        } else {
            slots[0] as i32 as isize
        }
    }
}

impl PackArg for f32 {
    const SLOTS: usize = 1;

    fn pack(self, out: &mut Vec<Slot>) {
        out.push(self.to_bits());
    }

    fn unpack(slots: &[Slot]) -> Self {
        f32::from_bits(slots[0])
    }
}

impl PackArg for bool {
    const SLOTS: usize = 1;

    fn pack(self, out: &mut Vec<Slot>) {
        out.push(self as Slot);
    }

    fn unpack(slots: &[Slot]) -> Self {
        slots[0] != 0
    }
}

impl PackArg for char {
    const SLOTS: usize = 1;

    fn pack(self, out: &mut Vec<Slot>) {
        out.push(self as Slot);
    }

    fn unpack(slots: &[Slot]) -> Self {
        char::from_u32(slots[0]).unwrap_or(char::REPLACEMENT_CHARACTER)
    }
}

/// A tuple of up to ten [`PackArg`]s and the plain `fn` that takes them.
pub trait PackArgs: 'static {
    const ARGC: usize;
    const SLOTS: usize;
    type Func: Copy + 'static;

    fn pack(self, out: &mut Vec<Slot>);
    /// Unpack `slots` and call `f`
    fn call(f: Self::Func, slots: &[Slot]);
}

macro_rules! tuple_args {
    ($argc:expr; $($T:ident $v:ident),*) => {
        impl<$($T: PackArg),*> PackArgs for ($($T,)*) {
            const ARGC: usize = $argc;
            const SLOTS: usize = 0 $(+ $T::SLOTS)*;
            type Func = fn($($T),*);

            #[allow(unused_variables)]
            fn pack(self, out: &mut Vec<Slot>) {
                let ($($v,)*) = self;
                $($v.pack(out);)*
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn call(f: Self::Func, slots: &[Slot]) {
                let mut at = 0;
                $(
                    let $v = $T::unpack(&slots[at..at + $T::SLOTS]);
                    at += $T::SLOTS;
                )*
                f($($v),*)
            }
        }
    };
}

tuple_args!(0;);
tuple_args!(1; A a);
tuple_args!(2; A a, B b);
tuple_args!(3; A a, B b, D d);
tuple_args!(4; A a, B b, D d, E e);
tuple_args!(5; A a, B b, D d, E e, F f_);
tuple_args!(6; A a, B b, D d, E e, F f_, G g);
tuple_args!(7; A a, B b, D d, E e, F f_, G g, H h);
tuple_args!(8; A a, B b, D d, E e, F f_, G g, H h, I i);
tuple_args!(9; A a, B b, D d, E e, F f_, G g, H h, I i, J j);
tuple_args!(10; A a, B b, D d, E e, F f_, G g, H h, I i, J j, K k);
