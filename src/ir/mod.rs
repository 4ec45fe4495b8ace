//! The intermediate representation: instructions, blocks, symbols, and the
//! program arena that ties them together.

mod block;
mod builder;
mod instr;
mod program;
mod symbols;

pub use block::{Block, BlockKind, Repeat};
pub use builder::ProgramBuilder;
pub use instr::{BlockId, Instr, InstrId, Opcode, Operand, RegSlots, Slot, Variable};
pub use program::Program;
pub use symbols::{FuncId, FunctionSymbol, SymbolTable, Type};
