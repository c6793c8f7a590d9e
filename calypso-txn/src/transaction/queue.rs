//! FIFO of prepared card commands

use std::collections::VecDeque;

use super::command::CardCommand;

/// Commands accumulated by `prepare_*` calls, consumed once by the next flush
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<CardCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: CardCommand) {
        self.entries.push_back(command);
    }

    /// Most recently prepared command
    pub fn back(&self) -> Option<&CardCommand> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardCommand> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every command, oldest first
    pub fn take_all(&mut self) -> Vec<CardCommand> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_all_preserves_order_and_empties() {
        let mut queue = CommandQueue::new();
        queue.push(CardCommand::Invalidate);
        queue.push(CardCommand::Rehabilitate);
        assert_eq!(queue.back(), Some(&CardCommand::Rehabilitate));
        let taken = queue.take_all();
        assert_eq!(taken, vec![CardCommand::Invalidate, CardCommand::Rehabilitate]);
        assert!(queue.is_empty());
    }
}
