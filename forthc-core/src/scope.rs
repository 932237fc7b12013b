use anyhow::{ensure, Result};
use std::fmt::{Display, Formatter};

pub const WORD_SIZE: usize = 8;
pub const STACK_ALIGNMENT: usize = 16;

pub fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/*
        native stack of one word activation

    |  return address       |  <- rsp % 16 == 8 on entry
    |  saved rbp            |  <- rbp, rsp % 16 == 0
    |  local 0  [rbp - 8]   |
    |  local 1  [rbp - 16]  |
    |  ...  (padded to 16)  |  <- rsp after the prologue
    |  loop contexts (16)   |  <- one (count, start) pair per open DO
    |  print scratch        |  <- r8 r9 r10 + padding around printf
*/

/// Local-variable layout of one word definition.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    slots: Vec<String>,
}

impl Frame {
    pub fn new(locals: &[String]) -> Self {
        Self {
            slots: locals.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// rbp-relative offset of a slot
    pub fn offset(&self, slot: usize) -> i64 {
        -((WORD_SIZE * (slot + 1)) as i64)
    }

    /// bytes reserved below the saved frame pointer
    pub fn size(&self) -> usize {
        align_up(WORD_SIZE * self.slots.len(), STACK_ALIGNMENT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelClass {
    LoopExit = 6,
    IfEnd = 7,
    IfElse = 8,
    LoopTop = 9,
}

/// Numeric assembler label. The class digit is followed by the nesting
/// depth, so constructs at the same depth share a name and are told apart
/// by the direction of the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalLabel {
    pub class: LabelClass,
    pub depth: usize,
}

impl Display for LocalLabel {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}{}", self.class as u8, self.depth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRef {
    pub label: LocalLabel,
    pub direction: Direction,
}

impl LocalLabel {
    pub fn forward(self) -> LabelRef {
        LabelRef {
            label: self,
            direction: Direction::Forward,
        }
    }

    pub fn backward(self) -> LabelRef {
        LabelRef {
            label: self,
            direction: Direction::Backward,
        }
    }
}

impl Display for LabelRef {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.direction {
            Direction::Forward => write!(f, "{}f", self.label),
            Direction::Backward => write!(f, "{}b", self.label),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfLabels {
    pub else_label: LocalLabel,
    pub end_label: LocalLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLabels {
    pub top_label: LocalLabel,
    pub exit_label: LocalLabel,
}

/// Hands out control-flow labels by nesting depth. Conditionals and loops
/// keep separate depths and separate label classes.
#[derive(Debug, Default)]
pub struct LabelAllocator {
    if_depth: usize,
    loop_depth: usize,
}

impl LabelAllocator {
    pub fn enter_if(&mut self) -> IfLabels {
        self.if_depth += 1;
        IfLabels {
            else_label: LocalLabel {
                class: LabelClass::IfElse,
                depth: self.if_depth,
            },
            end_label: LocalLabel {
                class: LabelClass::IfEnd,
                depth: self.if_depth,
            },
        }
    }

    pub fn exit_if(&mut self) {
        debug_assert!(self.if_depth > 0, "exit_if without enter_if");
        self.if_depth = self.if_depth.saturating_sub(1);
    }

    pub fn enter_loop(&mut self) -> LoopLabels {
        self.loop_depth += 1;
        LoopLabels {
            top_label: LocalLabel {
                class: LabelClass::LoopTop,
                depth: self.loop_depth,
            },
            exit_label: LocalLabel {
                class: LabelClass::LoopExit,
                depth: self.loop_depth,
            },
        }
    }

    pub fn exit_loop(&mut self) {
        debug_assert!(self.loop_depth > 0, "exit_loop without enter_loop");
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    pub fn is_balanced(&self) -> bool {
        self.if_depth == 0 && self.loop_depth == 0
    }
}

/// An open `DO ... LOOP`: its labels and the native-stack depth below its
/// (count, start) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopContext {
    pub labels: LoopLabels,
    pub base_bytes: usize,
}

/// Per-compilation emission state: label depths, open loops and the number
/// of bytes pushed on the native stack since the current word's prologue.
#[derive(Default)]
pub struct Scopes {
    labels: LabelAllocator,
    loops: Vec<LoopContext>,
    pushed_bytes: usize,
    frame: Frame,
    word: Option<String>,
}

impl Scopes {
    pub fn new() -> Self {
        Scopes::default()
    }

    pub fn enter_word(&mut self, name: &str, frame: Frame) {
        self.word = Some(name.to_string());
        self.frame = frame;
        self.pushed_bytes = 0;
    }

    pub fn exit_word(&mut self) -> Result<()> {
        let name = self.word.take().unwrap_or_default();
        ensure!(
            self.labels.is_balanced() && self.loops.is_empty(),
            "Unbalanced control flow in '{name}'"
        );
        ensure!(
            self.pushed_bytes == 0,
            "Native stack is off by {} bytes at the end of '{name}'",
            self.pushed_bytes
        );
        Ok(())
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn labels(&mut self) -> &mut LabelAllocator {
        &mut self.labels
    }

    pub fn pushed_bytes(&self) -> usize {
        self.pushed_bytes
    }

    pub fn native_pushed(&mut self, bytes: usize) {
        self.pushed_bytes += bytes;
    }

    pub fn native_popped(&mut self, bytes: usize) {
        debug_assert!(self.pushed_bytes >= bytes, "native stack underflow");
        self.pushed_bytes = self.pushed_bytes.saturating_sub(bytes);
    }

    pub fn push_loop(&mut self, labels: LoopLabels) {
        self.loops.push(LoopContext {
            labels,
            base_bytes: self.pushed_bytes,
        });
    }

    pub fn peek_loop(&self) -> Option<&LoopContext> {
        self.loops.last()
    }

    pub fn pop_loop(&mut self) -> Option<LoopContext> {
        self.loops.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(frame.offset(0), -8);
        assert_eq!(frame.offset(2), -24);
        assert_eq!(frame.size(), 32);
        assert_eq!(frame.len(), 3);

        assert_eq!(Frame::new(&[]).size(), 0);
        assert_eq!(Frame::new(&["x".to_string()]).size(), 16);
    }

    #[test]
    fn test_label_depths() {
        let mut labels = LabelAllocator::default();

        let outer = labels.enter_if();
        let inner = labels.enter_if();
        assert_eq!(outer.else_label.to_string(), "81");
        assert_eq!(inner.end_label.to_string(), "72");
        labels.exit_if();

        // a sibling at the same depth reuses the name
        let sibling = labels.enter_if();
        assert_eq!(sibling, inner);
        labels.exit_if();

        let lp = labels.enter_loop();
        assert_eq!(lp.top_label.backward().to_string(), "91b");
        assert_eq!(lp.exit_label.forward().to_string(), "61f");
        labels.exit_loop();
        labels.exit_if();

        assert!(labels.is_balanced());
    }

    #[test]
    fn test_deep_labels_stay_distinct() {
        let mut labels = LabelAllocator::default();
        let mut names = vec![];
        for _ in 0..12 {
            let l = labels.enter_loop();
            names.push(l.top_label.to_string());
            names.push(l.exit_label.to_string());
        }
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_loop_contexts() {
        let mut scopes = Scopes::new();
        scopes.enter_word("w", Frame::default());
        assert!(scopes.peek_loop().is_none());

        let labels = scopes.labels().enter_loop();
        scopes.push_loop(labels);
        scopes.native_pushed(16);
        assert_eq!(scopes.peek_loop().map(|c| c.base_bytes), Some(0));

        scopes.native_popped(16);
        scopes.labels().exit_loop();
        assert_eq!(scopes.pop_loop().map(|c| c.labels), Some(labels));
        assert!(scopes.exit_word().is_ok());
    }

    #[test]
    fn test_unbalanced_word() {
        let mut scopes = Scopes::new();
        scopes.enter_word("w", Frame::default());
        scopes.native_pushed(8);
        assert_eq!(
            scopes.exit_word().unwrap_err().to_string(),
            "Native stack is off by 8 bytes at the end of 'w'"
        );
    }
}
