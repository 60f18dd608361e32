//! Byte codec for chunks.
//!
//! One tag byte per instruction followed by its operands: registers are one
//! byte, constant/cache indices two bytes little-endian, jump offsets two
//! bytes signed. Chunks themselves are in-memory only; the codec exists for
//! tooling and the encode/decode equivalence tests.

use crate::chunk::{Chunk, Constant, LineRun};
use crate::opcode::{Opcode, UpvalueDesc};
use num_bigint::BigInt;
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"PSBC";
const VERSION: u8 = 1;

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn i16(&mut self, v: i16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.out.extend_from_slice(v);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, String> {
        let v = *self.buf.get(self.at).ok_or("unexpected end of bytecode")?;
        self.at += 1;
        Ok(v)
    }
    fn u16(&mut self) -> Result<u16, String> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }
    fn i16(&mut self) -> Result<i16, String> {
        let raw = self.take(2)?;
        Ok(i16::from_le_bytes([raw[0], raw[1]]))
    }
    fn u32(&mut self) -> Result<u32, String> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
    fn f64(&mut self) -> Result<f64, String> {
        let raw = self.take(8)?;
        let mut bits = [0u8; 8];
        bits.copy_from_slice(raw);
        Ok(f64::from_le_bytes(bits))
    }
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.at + n > self.buf.len() {
            return Err("unexpected end of bytecode".to_string());
        }
        let slice = &self.buf[self.at..self.at + n];
        self.at += n;
        Ok(slice)
    }
    fn bytes(&mut self) -> Result<&'a [u8], String> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// Serializes a chunk (and its nested functions) to bytes.
pub fn chunk_to_bytes(chunk: &Chunk) -> Vec<u8> {
    let mut w = Writer { out: Vec::new() };
    w.out.extend_from_slice(MAGIC);
    w.u8(VERSION);
    write_chunk(&mut w, chunk);
    w.out
}

/// Deserializes a chunk produced by [`chunk_to_bytes`].
pub fn chunk_from_bytes(bytes: &[u8]) -> Result<Chunk, String> {
    if bytes.len() < 5 || &bytes[0..4] != MAGIC {
        return Err("invalid bytecode header".to_string());
    }
    if bytes[4] != VERSION {
        return Err(format!("unsupported bytecode version {}", bytes[4]));
    }
    let mut r = Reader { buf: bytes, at: 5 };
    read_chunk(&mut r)
}

fn write_chunk(w: &mut Writer, chunk: &Chunk) {
    match &chunk.name {
        Some(name) => {
            w.u8(1);
            w.bytes(name.as_bytes());
        }
        None => w.u8(0),
    }
    w.u8(chunk.arity);
    w.u8(chunk.is_variadic as u8);
    w.u8(chunk.is_async as u8);
    w.u16(chunk.register_count);
    w.u16(chunk.ic_slot_count);

    w.u32(chunk.constants.len() as u32);
    for constant in &chunk.constants {
        write_constant(w, constant);
    }

    w.u32(chunk.lines.len() as u32);
    for run in &chunk.lines {
        w.u32(run.start);
        w.u32(run.line);
    }

    w.u32(chunk.code.len() as u32);
    for op in &chunk.code {
        write_op(w, op);
    }

    w.u32(chunk.functions.len() as u32);
    for func in &chunk.functions {
        write_chunk(w, func);
    }
}

fn read_chunk(r: &mut Reader) -> Result<Chunk, String> {
    let name = if r.u8()? != 0 {
        Some(
            String::from_utf8(r.bytes()?.to_vec())
                .map_err(|e| format!("invalid chunk name: {}", e))?,
        )
    } else {
        None
    };
    let arity = r.u8()?;
    let is_variadic = r.u8()? != 0;
    let is_async = r.u8()? != 0;
    let register_count = r.u16()?;
    let ic_slot_count = r.u16()?;

    let const_count = r.u32()? as usize;
    let mut constants = Vec::with_capacity(const_count);
    for _ in 0..const_count {
        constants.push(read_constant(r)?);
    }

    let line_count = r.u32()? as usize;
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        let start = r.u32()?;
        let line = r.u32()?;
        lines.push(LineRun { start, line });
    }

    let code_count = r.u32()? as usize;
    let mut code = Vec::with_capacity(code_count);
    for _ in 0..code_count {
        code.push(read_op(r)?);
    }

    let func_count = r.u32()? as usize;
    let mut functions = Vec::with_capacity(func_count);
    for _ in 0..func_count {
        functions.push(Arc::new(read_chunk(r)?));
    }

    Ok(Chunk {
        code,
        constants,
        lines,
        register_count,
        ic_slot_count,
        functions,
        name,
        arity,
        is_variadic,
        is_async,
    })
}

fn write_constant(w: &mut Writer, constant: &Constant) {
    match constant {
        Constant::Undefined => w.u8(0),
        Constant::Null => w.u8(1),
        Constant::Bool(b) => {
            w.u8(2);
            w.u8(*b as u8);
        }
        Constant::Int(n) => {
            w.u8(3);
            w.u32(*n as u32);
        }
        Constant::Number(n) => {
            w.u8(4);
            w.f64(*n);
        }
        Constant::String(s) => {
            w.u8(5);
            w.bytes(s.as_bytes());
        }
        Constant::BigInt(n) => {
            w.u8(6);
            w.bytes(&n.to_signed_bytes_le());
        }
    }
}

fn read_constant(r: &mut Reader) -> Result<Constant, String> {
    Ok(match r.u8()? {
        0 => Constant::Undefined,
        1 => Constant::Null,
        2 => Constant::Bool(r.u8()? != 0),
        3 => Constant::Int(r.u32()? as i32),
        4 => Constant::Number(r.f64()?),
        5 => Constant::String(
            String::from_utf8(r.bytes()?.to_vec())
                .map_err(|e| format!("invalid string constant: {}", e))?,
        ),
        6 => Constant::BigInt(BigInt::from_signed_bytes_le(r.bytes()?)),
        tag => return Err(format!("unknown constant tag {}", tag)),
    })
}

macro_rules! triple {
    ($w:expr, $tag:expr, $dst:expr, $lhs:expr, $rhs:expr) => {{
        $w.u8($tag);
        $w.u8(*$dst);
        $w.u8(*$lhs);
        $w.u8(*$rhs);
    }};
}

fn write_op(w: &mut Writer, op: &Opcode) {
    match op {
        Opcode::LoadConst { dst, idx } => {
            w.u8(0);
            w.u8(*dst);
            w.u16(*idx);
        }
        Opcode::LoadUndefined { dst } => {
            w.u8(1);
            w.u8(*dst);
        }
        Opcode::LoadNull { dst } => {
            w.u8(2);
            w.u8(*dst);
        }
        Opcode::LoadBool { dst, value } => {
            w.u8(3);
            w.u8(*dst);
            w.u8(*value as u8);
        }
        Opcode::LoadGlobal { dst, slot } => {
            w.u8(4);
            w.u8(*dst);
            w.u16(*slot);
        }
        Opcode::StoreGlobal { slot, src } => {
            w.u8(5);
            w.u16(*slot);
            w.u8(*src);
        }
        Opcode::Move { dst, src } => {
            w.u8(6);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::LoadThis { dst } => {
            w.u8(7);
            w.u8(*dst);
        }
        Opcode::Add { dst, lhs, rhs } => triple!(w, 8, dst, lhs, rhs),
        Opcode::Sub { dst, lhs, rhs } => triple!(w, 9, dst, lhs, rhs),
        Opcode::Mul { dst, lhs, rhs } => triple!(w, 10, dst, lhs, rhs),
        Opcode::Div { dst, lhs, rhs } => triple!(w, 11, dst, lhs, rhs),
        Opcode::Rem { dst, lhs, rhs } => triple!(w, 12, dst, lhs, rhs),
        Opcode::Pow { dst, lhs, rhs } => triple!(w, 13, dst, lhs, rhs),
        Opcode::BitAnd { dst, lhs, rhs } => triple!(w, 14, dst, lhs, rhs),
        Opcode::BitOr { dst, lhs, rhs } => triple!(w, 15, dst, lhs, rhs),
        Opcode::BitXor { dst, lhs, rhs } => triple!(w, 16, dst, lhs, rhs),
        Opcode::Shl { dst, lhs, rhs } => triple!(w, 17, dst, lhs, rhs),
        Opcode::Shr { dst, lhs, rhs } => triple!(w, 18, dst, lhs, rhs),
        Opcode::UShr { dst, lhs, rhs } => triple!(w, 19, dst, lhs, rhs),
        Opcode::Neg { dst, src } => {
            w.u8(20);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::BitNot { dst, src } => {
            w.u8(21);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::Not { dst, src } => {
            w.u8(22);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::TypeOf { dst, src } => {
            w.u8(23);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::Eq { dst, lhs, rhs } => triple!(w, 24, dst, lhs, rhs),
        Opcode::Ne { dst, lhs, rhs } => triple!(w, 25, dst, lhs, rhs),
        Opcode::StrictEq { dst, lhs, rhs } => triple!(w, 26, dst, lhs, rhs),
        Opcode::StrictNe { dst, lhs, rhs } => triple!(w, 27, dst, lhs, rhs),
        Opcode::Lt { dst, lhs, rhs } => triple!(w, 28, dst, lhs, rhs),
        Opcode::Le { dst, lhs, rhs } => triple!(w, 29, dst, lhs, rhs),
        Opcode::Gt { dst, lhs, rhs } => triple!(w, 30, dst, lhs, rhs),
        Opcode::Ge { dst, lhs, rhs } => triple!(w, 31, dst, lhs, rhs),
        Opcode::Jump { offset } => {
            w.u8(32);
            w.i16(*offset);
        }
        Opcode::JumpIfFalse { cond, offset } => {
            w.u8(33);
            w.u8(*cond);
            w.i16(*offset);
        }
        Opcode::JumpIfTrue { cond, offset } => {
            w.u8(34);
            w.u8(*cond);
            w.i16(*offset);
        }
        Opcode::JumpIfNullish { cond, offset } => {
            w.u8(35);
            w.u8(*cond);
            w.i16(*offset);
        }
        Opcode::Call { dst, callee, argc } => {
            w.u8(36);
            w.u8(*dst);
            w.u8(*callee);
            w.u8(*argc);
        }
        Opcode::CallMethod {
            dst,
            recv,
            name,
            argc,
            ic,
        } => {
            w.u8(37);
            w.u8(*dst);
            w.u8(*recv);
            w.u16(*name);
            w.u8(*argc);
            w.u16(*ic);
        }
        Opcode::Return { src } => {
            w.u8(38);
            w.u8(*src);
        }
        Opcode::ReturnUndefined => w.u8(39),
        Opcode::Throw { src } => {
            w.u8(40);
            w.u8(*src);
        }
        Opcode::NewObject { dst } => {
            w.u8(41);
            w.u8(*dst);
        }
        Opcode::GetProp { dst, obj, name, ic } => {
            w.u8(42);
            w.u8(*dst);
            w.u8(*obj);
            w.u16(*name);
            w.u16(*ic);
        }
        Opcode::SetProp { obj, name, src, ic } => {
            w.u8(43);
            w.u8(*obj);
            w.u16(*name);
            w.u8(*src);
            w.u16(*ic);
        }
        Opcode::GetIndex { dst, obj, idx, ic } => {
            w.u8(44);
            w.u8(*dst);
            w.u8(*obj);
            w.u8(*idx);
            w.u16(*ic);
        }
        Opcode::SetIndex { obj, idx, src, ic } => {
            w.u8(45);
            w.u8(*obj);
            w.u8(*idx);
            w.u8(*src);
            w.u16(*ic);
        }
        Opcode::DeleteProp { dst, obj, name } => {
            w.u8(46);
            w.u8(*dst);
            w.u8(*obj);
            w.u16(*name);
        }
        Opcode::NewArray { dst, start, count } => {
            w.u8(47);
            w.u8(*dst);
            w.u8(*start);
            w.u8(*count);
        }
        Opcode::MakeClosure { dst, func, upvalues } => {
            w.u8(48);
            w.u8(*dst);
            w.u16(*func);
            w.u8(upvalues.len() as u8);
            for desc in upvalues {
                w.u8(desc.is_local as u8);
                w.u8(desc.index);
            }
        }
        Opcode::GetUpvalue { dst, idx } => {
            w.u8(49);
            w.u8(*dst);
            w.u8(*idx);
        }
        Opcode::SetUpvalue { idx, src } => {
            w.u8(50);
            w.u8(*idx);
            w.u8(*src);
        }
        Opcode::CloseUpvalues { from } => {
            w.u8(51);
            w.u8(*from);
        }
        Opcode::PushHandler { offset, reg } => {
            w.u8(52);
            w.i16(*offset);
            w.u8(*reg);
        }
        Opcode::PopHandler => w.u8(53),
        Opcode::Await { dst, src } => {
            w.u8(54);
            w.u8(*dst);
            w.u8(*src);
        }
        Opcode::DefineAccessor {
            obj,
            name,
            getter,
            setter,
        } => {
            w.u8(55);
            w.u8(*obj);
            w.u16(*name);
            w.u8(*getter);
            w.u8(*setter);
        }
    }
}

fn read_op(r: &mut Reader) -> Result<Opcode, String> {
    macro_rules! rtriple {
        ($variant:ident) => {
            Opcode::$variant {
                dst: r.u8()?,
                lhs: r.u8()?,
                rhs: r.u8()?,
            }
        };
    }
    Ok(match r.u8()? {
        0 => Opcode::LoadConst {
            dst: r.u8()?,
            idx: r.u16()?,
        },
        1 => Opcode::LoadUndefined { dst: r.u8()? },
        2 => Opcode::LoadNull { dst: r.u8()? },
        3 => Opcode::LoadBool {
            dst: r.u8()?,
            value: r.u8()? != 0,
        },
        4 => Opcode::LoadGlobal {
            dst: r.u8()?,
            slot: r.u16()?,
        },
        5 => Opcode::StoreGlobal {
            slot: r.u16()?,
            src: r.u8()?,
        },
        6 => Opcode::Move {
            dst: r.u8()?,
            src: r.u8()?,
        },
        7 => Opcode::LoadThis { dst: r.u8()? },
        8 => rtriple!(Add),
        9 => rtriple!(Sub),
        10 => rtriple!(Mul),
        11 => rtriple!(Div),
        12 => rtriple!(Rem),
        13 => rtriple!(Pow),
        14 => rtriple!(BitAnd),
        15 => rtriple!(BitOr),
        16 => rtriple!(BitXor),
        17 => rtriple!(Shl),
        18 => rtriple!(Shr),
        19 => rtriple!(UShr),
        20 => Opcode::Neg {
            dst: r.u8()?,
            src: r.u8()?,
        },
        21 => Opcode::BitNot {
            dst: r.u8()?,
            src: r.u8()?,
        },
        22 => Opcode::Not {
            dst: r.u8()?,
            src: r.u8()?,
        },
        23 => Opcode::TypeOf {
            dst: r.u8()?,
            src: r.u8()?,
        },
        24 => rtriple!(Eq),
        25 => rtriple!(Ne),
        26 => rtriple!(StrictEq),
        27 => rtriple!(StrictNe),
        28 => rtriple!(Lt),
        29 => rtriple!(Le),
        30 => rtriple!(Gt),
        31 => rtriple!(Ge),
        32 => Opcode::Jump { offset: r.i16()? },
        33 => Opcode::JumpIfFalse {
            cond: r.u8()?,
            offset: r.i16()?,
        },
        34 => Opcode::JumpIfTrue {
            cond: r.u8()?,
            offset: r.i16()?,
        },
        35 => Opcode::JumpIfNullish {
            cond: r.u8()?,
            offset: r.i16()?,
        },
        36 => Opcode::Call {
            dst: r.u8()?,
            callee: r.u8()?,
            argc: r.u8()?,
        },
        37 => Opcode::CallMethod {
            dst: r.u8()?,
            recv: r.u8()?,
            name: r.u16()?,
            argc: r.u8()?,
            ic: r.u16()?,
        },
        38 => Opcode::Return { src: r.u8()? },
        39 => Opcode::ReturnUndefined,
        40 => Opcode::Throw { src: r.u8()? },
        41 => Opcode::NewObject { dst: r.u8()? },
        42 => Opcode::GetProp {
            dst: r.u8()?,
            obj: r.u8()?,
            name: r.u16()?,
            ic: r.u16()?,
        },
        43 => Opcode::SetProp {
            obj: r.u8()?,
            name: r.u16()?,
            src: r.u8()?,
            ic: r.u16()?,
        },
        44 => Opcode::GetIndex {
            dst: r.u8()?,
            obj: r.u8()?,
            idx: r.u8()?,
            ic: r.u16()?,
        },
        45 => Opcode::SetIndex {
            obj: r.u8()?,
            idx: r.u8()?,
            src: r.u8()?,
            ic: r.u16()?,
        },
        46 => Opcode::DeleteProp {
            dst: r.u8()?,
            obj: r.u8()?,
            name: r.u16()?,
        },
        47 => Opcode::NewArray {
            dst: r.u8()?,
            start: r.u8()?,
            count: r.u8()?,
        },
        48 => {
            let dst = r.u8()?;
            let func = r.u16()?;
            let count = r.u8()? as usize;
            let mut upvalues = Vec::with_capacity(count);
            for _ in 0..count {
                let is_local = r.u8()? != 0;
                let index = r.u8()?;
                upvalues.push(UpvalueDesc::new(is_local, index));
            }
            Opcode::MakeClosure { dst, func, upvalues }
        }
        49 => Opcode::GetUpvalue {
            dst: r.u8()?,
            idx: r.u8()?,
        },
        50 => Opcode::SetUpvalue {
            idx: r.u8()?,
            src: r.u8()?,
        },
        51 => Opcode::CloseUpvalues { from: r.u8()? },
        52 => Opcode::PushHandler {
            offset: r.i16()?,
            reg: r.u8()?,
        },
        53 => Opcode::PopHandler,
        54 => Opcode::Await {
            dst: r.u8()?,
            src: r.u8()?,
        },
        55 => Opcode::DefineAccessor {
            obj: r.u8()?,
            name: r.u16()?,
            getter: r.u8()?,
            setter: r.u8()?,
        },
        tag => return Err(format!("unknown opcode tag {}", tag)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let mut inner = Chunk::new();
        inner.arity = 1;
        inner.register_count = 3;
        inner.emit(Opcode::Return { src: 0 }, 2);

        let mut chunk = Chunk::new();
        chunk.register_count = 6;
        let k = chunk.add_constant(Constant::Number(42.0));
        let s = chunk.add_constant(Constant::String("test".into()));
        chunk.add_constant(Constant::BigInt(BigInt::from(1234567890i64)));
        let f = chunk.add_function(Arc::new(inner));
        chunk.emit(Opcode::LoadConst { dst: 0, idx: k }, 1);
        chunk.emit(Opcode::LoadConst { dst: 1, idx: s }, 1);
        chunk.emit(
            Opcode::Add {
                dst: 2,
                lhs: 0,
                rhs: 1,
            },
            1,
        );
        chunk.emit(
            Opcode::MakeClosure {
                dst: 3,
                func: f,
                upvalues: vec![UpvalueDesc::new(true, 2)],
            },
            2,
        );
        chunk.emit(Opcode::Return { src: 2 }, 3);

        let bytes = chunk_to_bytes(&chunk);
        let restored = chunk_from_bytes(&bytes).expect("decode");
        assert_eq!(chunk, restored);
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(chunk_from_bytes(b"XXXX\x01").is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let chunk = Chunk::new();
        let mut bytes = chunk_to_bytes(&chunk);
        bytes.truncate(bytes.len() - 1);
        assert!(chunk_from_bytes(&bytes).is_err());
    }
}
