//! Three-address instructions.

use std::fmt::{self, Display, Formatter};

/// Identifier of an instruction in the program arena.
///
/// The id doubles as the instruction's sequence number and, after SSA
/// construction, as the version of the value it produces. Ids are handed
/// out monotonically and are never reused or renumbered; deleting an
/// instruction only sets its soft-delete flag, so ids stay stable for the
/// whole compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub usize);

/// Identifier of a basic block in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl Display for InstrId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

/// The instruction set of the intermediate representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    /// Three-way compare: produces the sign of `src - dst`.
    Cmp,
    /// Array address computation: element offset plus the array base.
    Adda,
    Load,
    Store,
    /// Store a global's current value back to its memory cell.
    StoreGlobal,
    /// Reload a global from its memory cell, producing a fresh version.
    LoadGlobal,
    Move,
    Beq,
    Bne,
    Blt,
    Bge,
    Bgt,
    Ble,
    Bra,
    Call,
    Ret,
    Read,
    Write,
    WriteNl,
    Phi,
}

impl Opcode {
    /// Value-producing two-operand computations.
    pub fn is_arithmetic(self) -> bool {
        use Opcode::*;
        matches!(self, Add | Sub | Mul | Div | Cmp | Adda)
    }

    pub fn is_conditional_branch(self) -> bool {
        use Opcode::*;
        matches!(self, Beq | Bne | Blt | Bge | Bgt | Ble)
    }

    pub fn is_branch(self) -> bool {
        self.is_conditional_branch() || self == Opcode::Bra
    }

    /// Opcodes whose result lives in the instruction's own synthetic name
    /// and therefore carry an output register slot.
    pub fn produces_value(self) -> bool {
        use Opcode::*;
        self.is_arithmetic() || matches!(self, Load | Read)
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mnemonic = match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Cmp => "CMP",
            Opcode::Adda => "ADDA",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::StoreGlobal => "SG",
            Opcode::LoadGlobal => "LG",
            Opcode::Move => "MOVE",
            Opcode::Beq => "BEQ",
            Opcode::Bne => "BNE",
            Opcode::Blt => "BLT",
            Opcode::Bge => "BGE",
            Opcode::Bgt => "BGT",
            Opcode::Ble => "BLE",
            Opcode::Bra => "BRA",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Read => "READ",
            Opcode::Write => "WRITE",
            Opcode::WriteNl => "WRITENL",
            Opcode::Phi => "PHI",
        };
        f.write_str(mnemonic)
    }
}

/// A named variable together with its SSA version. Version 0 means
/// "unversioned": the value the name has on entry, before any definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub version: usize,
}

impl Variable {
    pub fn new(name: impl Into<String>, version: usize) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn unversioned(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.version > 0 {
            write!(f, "{}_{}", self.name, self.version)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// An instruction operand. Four shapes carry meaning:
///
/// - [`Operand::Const`]: a numeric literal, never versioned;
/// - [`Operand::Var`]: a source-level name plus SSA version;
/// - [`Operand::Temp`]: the value produced by another instruction,
///   written `(n)` where `n` is that instruction's sequence number;
/// - [`Operand::Block`]: a branch target, written `[b]` — control flow,
///   never a data value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Const(i32),
    Var(Variable),
    Temp(InstrId),
    Block(BlockId),
}

impl Operand {
    pub fn lit(value: i32) -> Self {
        Self::Const(value)
    }

    /// An unversioned named variable.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Var(Variable::unversioned(name))
    }

    pub fn var(name: impl Into<String>, version: usize) -> Self {
        Self::Var(Variable::new(name, version))
    }

    pub fn temp(id: InstrId) -> Self {
        Self::Temp(id)
    }

    pub fn block(id: BlockId) -> Self {
        Self::Block(id)
    }

    pub fn as_const(&self) -> Option<i32> {
        match self {
            Self::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Self::Var(variable) => Some(variable),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Self::Block(id) => Some(*id),
            _ => None,
        }
    }

    /// The interference-graph identity of this operand, if it names a
    /// live range (literals and branch targets do not).
    pub fn live_name(&self) -> Option<Operand> {
        match self {
            Self::Var(_) | Self::Temp(_) => Some(self.clone()),
            Self::Const(_) | Self::Block(_) => None,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Const(value) => value.fmt(f),
            Self::Var(variable) => variable.fmt(f),
            Self::Temp(id) => write!(f, "({})", id),
            Self::Block(id) => write!(f, "[{}]", id.0),
        }
    }
}

/// Color assigned to a live range by the register allocator. `Reg` indexes
/// the general-purpose palette (0-based); `Spill` is the reserved memory
/// pseudo-color for ranges that did not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Reg(usize),
    Spill,
}

/// Per-operand register annotations, filled in after coloring.
#[derive(Debug, Clone, Default)]
pub struct RegSlots {
    /// Register holding the instruction's own produced value.
    pub out: Option<Slot>,
    pub src: Option<Slot>,
    pub dst: Option<Slot>,
    /// One slot per call argument, parallel to `Instr::args`.
    pub args: Vec<Option<Slot>>,
}

/// A single three-address instruction.
///
/// `src`/`dst` are the two scalar operand slots. `args` is the list-valued
/// slot used by the multi-result opcodes: the arguments of a `CALL` (whose
/// callee name sits in `src`), or the incoming values of a `PHI` (whose
/// defined column variable sits in `src`, with `phi_preds` recording the
/// predecessor block each value arrives from).
#[derive(Debug, Clone)]
pub struct Instr {
    pub seq: InstrId,
    pub op: Opcode,
    pub src: Option<Operand>,
    pub dst: Option<Operand>,
    pub args: Vec<Operand>,
    pub phi_preds: Vec<BlockId>,
    /// The unversioned global shadowed by an `SG`/`LG` instruction.
    pub store_name: Option<String>,
    /// Entry block of the callee, resolved while linking (`CALL` only).
    pub call_target: Option<BlockId>,
    pub deleted: bool,
    pub regs: RegSlots,
}

impl Instr {
    pub fn new(seq: InstrId, op: Opcode) -> Self {
        Self {
            seq,
            op,
            src: None,
            dst: None,
            args: Vec::new(),
            phi_preds: Vec::new(),
            store_name: None,
            call_target: None,
            deleted: false,
            regs: RegSlots::default(),
        }
    }

    /// The synthetic operand referring to this instruction's own value.
    pub fn value(&self) -> Operand {
        Operand::Temp(self.seq)
    }

    /// The block this instruction branches to, if it is a branch.
    pub fn branch_target(&self) -> Option<BlockId> {
        if self.op.is_conditional_branch() {
            self.dst.as_ref().and_then(Operand::as_block)
        } else if self.op == Opcode::Bra {
            self.src.as_ref().and_then(Operand::as_block)
        } else {
            None
        }
    }

    /// Redirect this instruction's branch target.
    pub fn retarget_branch(&mut self, target: BlockId) {
        if self.op.is_conditional_branch() {
            self.dst = Some(Operand::Block(target));
        } else if self.op == Opcode::Bra {
            self.src = Some(Operand::Block(target));
        }
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.seq, self.op)?;
        match self.op {
            Opcode::Call | Opcode::Phi => {
                if let Some(src) = &self.src {
                    write!(f, " {}", src)?;
                }
                for arg in &self.args {
                    write!(f, " {}", arg)?;
                }
            }
            _ => {
                if let Some(src) = &self.src {
                    write!(f, " {}", src)?;
                }
                if let Some(dst) = &self.dst {
                    write!(f, " {}", dst)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_display_shapes() {
        assert_eq!("42", Operand::lit(42).to_string());
        assert_eq!("x", Operand::name("x").to_string());
        assert_eq!("x_3", Operand::var("x", 3).to_string());
        assert_eq!("(7)", Operand::temp(InstrId(7)).to_string());
        assert_eq!("[2]", Operand::block(BlockId(2)).to_string());
    }

    #[test]
    fn instr_display_includes_operands() {
        let mut instr = Instr::new(InstrId(4), Opcode::Add);
        instr.src = Some(Operand::lit(3));
        instr.dst = Some(Operand::name("x"));
        assert_eq!("4: ADD 3 x", instr.to_string());
    }

    #[test]
    fn branch_target_reads_the_right_slot() {
        let mut cond = Instr::new(InstrId(1), Opcode::Blt);
        cond.src = Some(Operand::temp(InstrId(0)));
        cond.dst = Some(Operand::block(BlockId(5)));
        assert_eq!(Some(BlockId(5)), cond.branch_target());

        let mut jump = Instr::new(InstrId(2), Opcode::Bra);
        jump.src = Some(Operand::block(BlockId(3)));
        assert_eq!(Some(BlockId(3)), jump.branch_target());

        jump.retarget_branch(BlockId(9));
        assert_eq!(Some(BlockId(9)), jump.branch_target());
    }
}
