//! §6's `<high>` wire format, written with `fmt::Write` directly rather
//! than a generic serializer, for the same field-order reason
//! `pcode_jumptable::encode` gives.

use crate::high_variable::{HighId, HighSet};
use pcode_entity::EntityRef;
use pcode_ir::{Funcdata, VarnodeFlags};
use std::fmt;

/// §6's `class` enumeration. `global`/`param` are read off `PERSIST`/
/// `INPUT` on the representative instance; `symref`, `typelock`'s backing
/// type, and a real type reference all depend on the out-of-scope symbol
/// and type subsystems (§1's Non-goals), so this encoder only ever emits
/// `class` and a bare `typelock` presence flag — never a symref or type
/// element.
fn class_of(flags: VarnodeFlags) -> &'static str {
    if flags.contains(VarnodeFlags::CONSTANT) {
        "constant"
    } else if flags.contains(VarnodeFlags::PERSIST) {
        "global"
    } else if flags.contains(VarnodeFlags::INPUT) {
        "param"
    } else if flags.contains(VarnodeFlags::SPACEBASE) {
        "other"
    } else {
        "local"
    }
}

/// §6: one `<high>` element for `id`.
pub fn encode_one(w: &mut impl fmt::Write, func: &Funcdata, set: &HighSet, id: HighId) -> fmt::Result {
    let high = set.get(id);
    let repvn = high.representative();
    let repdata = func.varnodes().get(repvn);

    write!(w, "<high repref=\"{}\" class=\"{}\"", repvn.index(), class_of(repdata.flags()))?;
    if repdata.flags().contains(VarnodeFlags::TYPELOCK) {
        write!(w, " typelock=\"true\"")?;
    }
    writeln!(w, ">")?;

    for &instance in high.instances() {
        let data = func.varnodes().get(instance);
        writeln!(
            w,
            "  <addr ref=\"{}\" space=\"{}\" offset=\"{:#x}\"/>",
            instance.index(),
            func.space(data.address().space()).name(),
            data.address().offset()
        )?;
    }

    writeln!(w, "</high>")
}

/// Every `<high>` element in `set`, in `HighId` creation order.
pub fn encode(w: &mut impl fmt::Write, func: &Funcdata, set: &HighSet) -> fmt::Result {
    for (id, high) in set.iter() {
        if high.instances().is_empty() {
            // Absorbed into another HighVariable by `merge_into`; no
            // longer a live variable to encode.
            continue;
        }
        encode_one(w, func, set, id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::testing::FuncdataBuilder;
    use pcode_ir::Opcode;

    #[test]
    fn encode_one_carries_the_representative_and_every_instance() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let vn0 = b.output(op0, 0x100, 4);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let vn1 = b.output(op1, 0x200, 4);
        let func = b.finish();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        let h0 = set.high_of(vn0).unwrap();
        let h1 = set.high_of(vn1).unwrap();
        set.merge_into(h0, h1, &func);

        let mut out = String::new();
        encode_one(&mut out, &func, &set, h0).unwrap();
        assert!(out.starts_with("<high "));
        assert!(out.contains("class=\"local\""));
        assert_eq!(out.matches("<addr ").count(), 2);
    }

    #[test]
    fn encode_skips_a_high_absorbed_by_merge_into() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let vn0 = b.output(op0, 0x100, 4);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let vn1 = b.output(op1, 0x200, 4);
        let func = b.finish();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        let h0 = set.high_of(vn0).unwrap();
        let h1 = set.high_of(vn1).unwrap();
        set.merge_into(h0, h1, &func);

        let mut out = String::new();
        encode(&mut out, &func, &set).unwrap();
        assert_eq!(out.matches("<high ").count(), 1);
    }

    #[test]
    fn class_of_prefers_constant_over_input() {
        assert_eq!(class_of(VarnodeFlags::CONSTANT | VarnodeFlags::INPUT), "constant");
        assert_eq!(class_of(VarnodeFlags::INPUT), "param");
        assert_eq!(class_of(VarnodeFlags::PERSIST), "global");
        assert_eq!(class_of(VarnodeFlags::empty()), "local");
    }
}
