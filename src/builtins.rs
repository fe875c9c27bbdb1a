//! Host functions shipped with the interpreter.

use anyhow::{anyhow, bail};

use crate::registry::Registry;

/// Registers every built-in under its program-visible name.
pub fn register_all(registry: &mut Registry) -> &mut Registry {
    registry
        .register("set", set)
        .register("copy", copy)
        .register("add", add)
        .register("clear", clear)
}

/// `&set addr value`
pub fn set(tape: &mut [u8], args: &[u64]) -> anyhow::Result<()> {
    let [addr, value] = expect_args::<2>("set", args)?;
    let Ok(value) = u8::try_from(value) else {
        bail!("set: value {value} does not fit in a cell");
    };
    *cell(tape, addr)? = value;
    Ok(())
}

/// `&copy src dst`
pub fn copy(tape: &mut [u8], args: &[u64]) -> anyhow::Result<()> {
    let [src, dst] = expect_args::<2>("copy", args)?;
    let value = *cell(tape, src)?;
    *cell(tape, dst)? = value;
    Ok(())
}

/// `&add a b dst`, wrapping like `+`.
pub fn add(tape: &mut [u8], args: &[u64]) -> anyhow::Result<()> {
    let [a, b, dst] = expect_args::<3>("add", args)?;
    let a = *cell(tape, a)?;
    let b = *cell(tape, b)?;
    *cell(tape, dst)? = a.wrapping_add(b);
    Ok(())
}

/// `&clear start len`
pub fn clear(tape: &mut [u8], args: &[u64]) -> anyhow::Result<()> {
    let [start, len] = expect_args::<2>("clear", args)?;
    let end = start
        .checked_add(len)
        .and_then(|end| usize::try_from(end).ok())
        .filter(|&end| end <= tape.len());
    let (Some(end), Ok(start)) = (end, usize::try_from(start)) else {
        bail!("clear: range {start}+{len} exceeds tape of {} cells", tape.len());
    };
    tape[start..end].fill(0);
    Ok(())
}

fn expect_args<const N: usize>(name: &str, args: &[u64]) -> anyhow::Result<[u64; N]> {
    match <[u64; N]>::try_from(args) {
        Ok(args) => Ok(args),
        Err(_) => bail!("{name}: expected {N} arguments, got {}", args.len()),
    }
}

fn cell(tape: &mut [u8], addr: u64) -> anyhow::Result<&mut u8> {
    let len = tape.len();
    usize::try_from(addr)
        .ok()
        .and_then(|index| tape.get_mut(index))
        .ok_or_else(|| anyhow!("address {addr} is outside the tape of {len} cells"))
}

#[test]
fn test_set_and_copy() -> anyhow::Result<()> {
    let mut tape = [0u8; 8];
    set(&mut tape, &[2, 65])?;
    copy(&mut tape, &[2, 5])?;
    assert_eq!(tape, [0, 0, 65, 0, 0, 65, 0, 0]);
    Ok(())
}

#[test]
fn test_add_wraps() -> anyhow::Result<()> {
    let mut tape = [200u8, 100, 0];
    add(&mut tape, &[0, 1, 2])?;
    assert_eq!(tape[2], 44);
    Ok(())
}

#[test]
fn test_clear_range() -> anyhow::Result<()> {
    let mut tape = [1u8; 6];
    clear(&mut tape, &[1, 3])?;
    assert_eq!(tape, [1, 0, 0, 0, 1, 1]);
    assert!(clear(&mut tape, &[4, 3]).is_err());
    Ok(())
}

#[test]
fn test_rejects_bad_arguments() -> anyhow::Result<()> {
    let mut tape = [0u8; 4];
    assert!(set(&mut tape, &[1]).is_err());
    assert!(set(&mut tape, &[1, 256]).is_err());
    assert!(set(&mut tape, &[4, 1]).is_err());
    assert!(add(&mut tape, &[0, 1]).is_err());
    assert_eq!(tape, [0; 4]);
    Ok(())
}

#[test]
fn test_register_all() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    register_all(&mut registry);
    for name in ["set", "copy", "add", "clear"] {
        assert!(registry.contains(name), "{name} must be registered");
    }
    Ok(())
}
