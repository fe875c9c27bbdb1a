use std::iter::Peekable;
use std::iter::Enumerate;
use std::str::Chars as SourceChars;

use thiserror::Error;
use tracing::debug;

/// Number of subroutine slots addressable by a single-digit id.
pub const FUNCTION_SLOTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BfInstruction {
    GoRight,
    GoLeft,
    Increment,
    Decrement,
    GetInput,
    PutOutput,
    LoopStart,
    LoopEnd,
    /// `@d`; `None` when the `@` is not followed by a digit.
    Call(Option<u8>),
    /// Opening `:d` of a subroutine definition.
    FunctionStart(u8),
    /// Closing `:` of a subroutine definition.
    FunctionEnd,
    /// `&name args...`
    External { name: String, args: Vec<u64> },
}

/// Half-open range of instruction indices making up a subroutine body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionBody {
    pub start: usize,
    pub end: usize,
}

impl FunctionBody {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("syntax error: ending loop `]` at offset {position} has no matching `[`")]
    LoopNotStarted { position: usize },
    #[error("syntax error: starting loop `[` at offset {position} is never closed")]
    LoopNotEnded { position: usize },
    #[error("syntax error: function :{id} at offset {position} not closed with ':'")]
    FunctionNotClosed { id: u8, position: usize },
    #[error("syntax error: `:` at offset {position} must be followed by a function id 0-9")]
    InvalidFunctionId { position: usize },
    #[error("syntax error: argument of external call at offset {position} is too large")]
    ArgumentOverflow { position: usize },
}

/// A decoded program: instructions plus the jump and function tables built
/// from them. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Program {
    instructions: Vec<BfInstruction>,
    jump_memo: Vec<usize>,
    functions: [Option<FunctionBody>; FUNCTION_SLOTS],
}

impl Program {
    pub fn parse(source: &str) -> Result<Self, LoadError> {
        let mut instructions = vec![];
        let mut loop_stack = vec![];
        let mut jump_memo = vec![];
        let mut functions = [None; FUNCTION_SLOTS];
        // (id, instruction index of the opening marker, source offset)
        let mut open_function: Option<(u8, usize, usize)> = None;

        let mut chars = source.chars().enumerate().peekable();
        while let Some((position, code)) = chars.next() {
            match code {
                '>' => instructions.push(BfInstruction::GoRight),
                '<' => instructions.push(BfInstruction::GoLeft),
                '+' => instructions.push(BfInstruction::Increment),
                '-' => instructions.push(BfInstruction::Decrement),
                ',' => instructions.push(BfInstruction::GetInput),
                '.' => instructions.push(BfInstruction::PutOutput),
                '[' => {
                    loop_stack.push((instructions.len(), position));
                    instructions.push(BfInstruction::LoopStart);
                }
                ']' => {
                    let ending = instructions.len();
                    let Some((beginning, _)) = loop_stack.pop() else {
                        return Err(LoadError::LoopNotStarted { position });
                    };
                    link(&mut jump_memo, beginning, ending);
                    instructions.push(BfInstruction::LoopEnd);
                }
                '@' => {
                    let id = next_digit(&mut chars);
                    instructions.push(BfInstruction::Call(id));
                }
                ':' => match open_function.take() {
                    Some((id, beginning, _)) => {
                        let ending = instructions.len();
                        link(&mut jump_memo, beginning, ending);
                        functions[usize::from(id)] = Some(FunctionBody {
                            start: beginning + 1,
                            end: ending,
                        });
                        instructions.push(BfInstruction::FunctionEnd);
                    }
                    None => {
                        let Some(id) = next_digit(&mut chars) else {
                            return Err(LoadError::InvalidFunctionId { position });
                        };
                        open_function = Some((id, instructions.len(), position));
                        instructions.push(BfInstruction::FunctionStart(id));
                    }
                },
                '&' => {
                    let name = take_name(&mut chars);
                    skip_whitespace(&mut chars);
                    let args = take_arguments(&mut chars, position)?;
                    instructions.push(BfInstruction::External { name, args });
                }
                _ => {}
            }
        }
        if let Some((id, _, position)) = open_function {
            return Err(LoadError::FunctionNotClosed { id, position });
        }
        if let Some(&(_, position)) = loop_stack.last() {
            return Err(LoadError::LoopNotEnded { position });
        }
        jump_memo.resize(instructions.len(), 0);

        debug!(
            instructions = instructions.len(),
            functions = functions.iter().flatten().count(),
            "program loaded"
        );
        Ok(Self {
            instructions,
            jump_memo,
            functions,
        })
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[BfInstruction] {
        &self.instructions
    }

    pub fn instruction(&self, index: usize) -> Option<&BfInstruction> {
        self.instructions.get(index)
    }

    /// Partner of the bracket or function marker at `index`.
    pub fn matching(&self, index: usize) -> Option<usize> {
        match self.instructions.get(index)? {
            BfInstruction::LoopStart
            | BfInstruction::LoopEnd
            | BfInstruction::FunctionStart(_)
            | BfInstruction::FunctionEnd => Some(self.jump_memo[index]),
            _ => None,
        }
    }

    pub(crate) fn jump_target(&self, index: usize) -> usize {
        self.jump_memo[index]
    }

    pub fn function(&self, id: u8) -> Option<FunctionBody> {
        self.functions.get(usize::from(id)).copied().flatten()
    }
}

fn link(jump_memo: &mut Vec<usize>, beginning: usize, ending: usize) {
    if jump_memo.len() <= ending {
        jump_memo.resize(ending + 1, 0);
    }
    jump_memo[beginning] = ending;
    jump_memo[ending] = beginning;
}

/// Source characters paired with their character offset.
type Chars<'a> = Peekable<Enumerate<SourceChars<'a>>>;

fn next_digit(chars: &mut Chars<'_>) -> Option<u8> {
    let &(_, c) = chars.peek()?;
    let digit = c.to_digit(10)?;
    chars.next();
    u8::try_from(digit).ok()
}

fn take_name(chars: &mut Chars<'_>) -> String {
    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            break;
        }
        name.push(c);
        chars.next();
    }
    name
}

fn skip_whitespace(chars: &mut Chars<'_>) {
    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
}

fn take_arguments(chars: &mut Chars<'_>, position: usize) -> Result<Vec<u64>, LoadError> {
    let mut args = vec![];
    while chars.peek().is_some_and(|&(_, c)| c.is_ascii_digit()) {
        let mut value: u64 = 0;
        while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_ascii_digit()) {
            let digit = u64::from(c as u8 - b'0');
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(LoadError::ArgumentOverflow { position })?;
        }
        args.push(value);
        skip_whitespace(chars);
    }
    Ok(args)
}

#[test]
fn test_loop_table_is_bijective() -> anyhow::Result<()> {
    let program = Program::parse("+[>[-]<-]")?;
    for (index, instruction) in program.instructions().iter().enumerate() {
        if matches!(instruction, BfInstruction::LoopStart | BfInstruction::LoopEnd) {
            let partner = program.matching(index).expect("bracket must have a partner");
            assert_eq!(program.matching(partner), Some(index));
        }
    }
    assert_eq!(program.matching(1), Some(8));
    assert_eq!(program.matching(3), Some(5));
    assert_eq!(program.matching(0), None);
    Ok(())
}

#[test]
fn test_comments_are_dropped() -> anyhow::Result<()> {
    let program = Program::parse("add two\n++ then print .")?;
    assert_eq!(
        program.instructions(),
        [
            BfInstruction::Increment,
            BfInstruction::Increment,
            BfInstruction::PutOutput,
        ]
    );
    Ok(())
}

#[test]
fn test_function_table() -> anyhow::Result<()> {
    let program = Program::parse(":1+:  :2>-<:@1@2")?;
    assert_eq!(program.function(1), Some(FunctionBody { start: 1, end: 2 }));
    assert_eq!(program.function(2), Some(FunctionBody { start: 4, end: 7 }));
    assert_eq!(program.function(3), None);
    assert_eq!(program.matching(0), Some(2));
    assert_eq!(program.matching(7), Some(3));
    assert_eq!(program.instruction(8), Some(&BfInstruction::Call(Some(1))));
    Ok(())
}

#[test]
fn test_function_redefinition_overwrites() -> anyhow::Result<()> {
    let program = Program::parse(":1+::1--:")?;
    assert_eq!(program.function(1), Some(FunctionBody { start: 4, end: 6 }));
    Ok(())
}

#[test]
fn test_empty_function_body() -> anyhow::Result<()> {
    let program = Program::parse(":0:")?;
    let body = program.function(0).expect("function 0 must be defined");
    assert!(body.is_empty());
    assert_eq!(body.len(), 0);
    let program = Program::parse(":4+>-:")?;
    assert_eq!(program.function(4).map(|body| body.len()), Some(3));
    Ok(())
}

#[test]
fn test_call_without_digit() -> anyhow::Result<()> {
    let program = Program::parse("@x+")?;
    assert_eq!(
        program.instructions(),
        [BfInstruction::Call(None), BfInstruction::Increment]
    );
    Ok(())
}

#[test]
fn test_external_call_grammar() -> anyhow::Result<()> {
    let program = Program::parse("&set_cell 3  200 7+&noop.")?;
    assert_eq!(
        program.instructions(),
        [
            BfInstruction::External {
                name: "set_cell".to_owned(),
                args: vec![3, 200, 7],
            },
            BfInstruction::Increment,
            BfInstruction::External {
                name: "noop".to_owned(),
                args: vec![],
            },
            BfInstruction::PutOutput,
        ]
    );
    Ok(())
}

#[test]
fn test_external_call_digits_in_name() -> anyhow::Result<()> {
    let program = Program::parse("&f2 10")?;
    assert_eq!(
        program.instructions(),
        [BfInstruction::External {
            name: "f2".to_owned(),
            args: vec![10],
        }]
    );
    Ok(())
}

#[test]
fn test_unclosed_function() -> anyhow::Result<()> {
    let err = Program::parse("++:3+-").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::FunctionNotClosed { id: 3, position: 2 });
    Ok(())
}

#[test]
fn test_invalid_function_id() -> anyhow::Result<()> {
    let err = Program::parse(":a+:").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::InvalidFunctionId { position: 0 });
    let err = Program::parse("+:").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::InvalidFunctionId { position: 1 });
    Ok(())
}

#[test]
fn test_argument_overflow() -> anyhow::Result<()> {
    let err = Program::parse("&f 99999999999999999999999").expect_err("must overflow");
    assert_eq!(err, LoadError::ArgumentOverflow { position: 0 });
    Ok(())
}

#[test]
fn test_not_opening_loop() -> anyhow::Result<()> {
    let err = Program::parse("+]").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::LoopNotStarted { position: 1 });
    Ok(())
}

#[test]
fn test_error_offsets_count_characters() -> anyhow::Result<()> {
    let err = Program::parse("é]").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::LoopNotStarted { position: 1 });
    let err = Program::parse("«»:x").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::InvalidFunctionId { position: 2 });
    Ok(())
}

#[test]
fn test_not_closing_loop() -> anyhow::Result<()> {
    let err = Program::parse("[[]").expect_err("must occur syntax error");
    assert_eq!(err, LoadError::LoopNotEnded { position: 0 });
    Ok(())
}
