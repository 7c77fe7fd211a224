use crate::format::{Alignment, MouseButton};

/// Identifier for an action block, an index into the block list.
///
/// `NO_ACTION` denotes no hit and is strictly smaller than any valid id.
/// When two blocks overlap, the higher id is on top.
pub type ActionId = i32;

pub const NO_ACTION: ActionId = -1;

/// A clickable or scrollable region recorded during drawing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBlock {
    pub cmd: String,
    pub button: MouseButton,
    pub align: Alignment,
    /// Start position (inclusive), relative to the alignment block.
    pub start_x: i32,
    /// End position (exclusive), relative to the alignment block.
    pub end_x: i32,
    /// Open until the matching close tag, or until the alignment block ends.
    pub is_open: bool,
}

impl ActionBlock {
    /// Point test in bar coordinates, given the alignment block origin.
    #[must_use]
    pub fn test(&self, align_start: i32, point: i32) -> bool {
        self.start_x + align_start <= point && self.end_x + align_start > point
    }
}

/// Tracks the action blocks produced during one render and answers hit
/// tests in between renders.
#[derive(Debug, Default)]
pub struct ActionContext {
    blocks: Vec<ActionBlock>,
    align_start: [i32; 3],
}

impl ActionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.blocks.clear();
        self.align_start = [0; 3];
    }

    pub fn open(
        &mut self,
        button: MouseButton,
        cmd: String,
        align: Alignment,
        x: i32,
    ) -> ActionId {
        let id = self.blocks.len() as ActionId;
        self.blocks.push(ActionBlock {
            cmd,
            button,
            align,
            start_x: x,
            end_x: x,
            is_open: true,
        });
        id
    }

    /// Close the topmost open block in this alignment. `MouseButton::None`
    /// matches any button, otherwise the button must be equal.
    pub fn close(
        &mut self,
        button: MouseButton,
        align: Alignment,
        x: i32,
    ) -> (ActionId, MouseButton) {
        for (id, block) in self.blocks.iter_mut().enumerate().rev() {
            if block.is_open
                && block.align == align
                && (button == MouseButton::None || block.button == button)
            {
                block.is_open = false;
                // Only ever increase the end position, a larger end may
                // already have been observed
                block.end_x = block.end_x.max(x);
                return (id as ActionId, block.button);
            }
        }
        (NO_ACTION, MouseButton::None)
    }

    /// Close every still-open block in the alignment; returns how many.
    pub fn close_remaining(&mut self, align: Alignment, x: i32) -> usize {
        let mut closed = 0;
        while {
            let (id, _) = self.close(MouseButton::None, align, x);
            id != NO_ACTION
        } {
            closed += 1;
        }
        closed
    }

    /// Record the bar-coordinate origin of an alignment block.
    pub fn set_alignment_start(&mut self, align: Alignment, x: i32) {
        self.align_start[align.index()] = x;
    }

    /// The pen retreated within an alignment; widen every open block so its
    /// interval still contains both positions.
    pub fn compensate_for_negative_move(&mut self, align: Alignment, old_x: i32, new_x: i32) {
        debug_assert!(new_x < old_x);
        for block in &mut self.blocks {
            if block.is_open && block.align == align {
                if block.start_x > new_x {
                    block.start_x = new_x;
                }
                if old_x > block.end_x {
                    block.end_x = old_x;
                }
            }
        }
    }

    /// For every button, the highest-id block containing `x` (bar
    /// coordinates), or `NO_ACTION`.
    #[must_use]
    pub fn actions_at(&self, x: i32) -> [ActionId; MouseButton::COUNT] {
        let mut hits = [NO_ACTION; MouseButton::COUNT];
        for (id, block) in self.blocks.iter().enumerate() {
            let id = id as ActionId;
            let slot = &mut hits[block.button.code() as usize];
            if id > *slot && block.test(self.align_start[block.align.index()], x) {
                *slot = id;
            }
        }
        hits
    }

    #[must_use]
    pub fn action_at(&self, button: MouseButton, x: i32) -> ActionId {
        self.actions_at(x)[button.code() as usize]
    }

    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<&ActionBlock> {
        usize::try_from(id).ok().and_then(|id| self.blocks.get(id))
    }

    #[must_use]
    pub fn num_actions(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn num_unclosed(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_open).count()
    }

    #[must_use]
    pub fn has_double_click(&self) -> bool {
        self.blocks.iter().any(|b| b.button.is_double())
    }

    #[must_use]
    pub fn blocks(&self) -> &[ActionBlock] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_with_negative_offset() {
        // E2: %{A1:do:}X%{O-10}Y%{A} with W(X)=8, W(Y)=6
        let mut ctx = ActionContext::new();
        let id = ctx.open(MouseButton::Left, "do".into(), Alignment::Left, 0);
        // after "X" the pen sits at 8, then O-10 retreats it to -2
        ctx.compensate_for_negative_move(Alignment::Left, 8, -2);
        // after "Y" the pen sits at 4
        let (closed, button) = ctx.close(MouseButton::None, Alignment::Left, 4);
        assert_eq!(closed, id);
        assert_eq!(button, MouseButton::Left);
        let block = ctx.get(id).unwrap();
        assert_eq!((block.start_x, block.end_x), (-2, 8));
        assert!(!block.is_open);
        assert_eq!(ctx.num_unclosed(), 0);
    }

    #[test]
    fn highest_id_wins_on_overlap() {
        let mut ctx = ActionContext::new();
        let outer = ctx.open(MouseButton::Left, "outer".into(), Alignment::Left, 0);
        let inner = ctx.open(MouseButton::Left, "inner".into(), Alignment::Left, 4);
        ctx.close(MouseButton::None, Alignment::Left, 8);
        ctx.close(MouseButton::None, Alignment::Left, 12);
        assert_eq!(ctx.action_at(MouseButton::Left, 5), inner);
        assert_eq!(ctx.action_at(MouseButton::Left, 2), outer);
        assert_eq!(ctx.action_at(MouseButton::Left, 20), NO_ACTION);
    }

    #[test]
    fn close_matches_button() {
        let mut ctx = ActionContext::new();
        let left = ctx.open(MouseButton::Left, "l".into(), Alignment::Left, 0);
        let scroll = ctx.open(MouseButton::ScrollUp, "s".into(), Alignment::Left, 0);
        let (id, _) = ctx.close(MouseButton::Left, Alignment::Left, 10);
        assert_eq!(id, left);
        let (id, button) = ctx.close(MouseButton::None, Alignment::Left, 10);
        assert_eq!(id, scroll);
        assert_eq!(button, MouseButton::ScrollUp);
    }

    #[test]
    fn hit_test_uses_alignment_origin() {
        let mut ctx = ActionContext::new();
        let id = ctx.open(MouseButton::Left, "r".into(), Alignment::Right, 0);
        ctx.close(MouseButton::None, Alignment::Right, 10);
        ctx.set_alignment_start(Alignment::Right, 90);
        assert_eq!(ctx.action_at(MouseButton::Left, 95), id);
        assert_eq!(ctx.action_at(MouseButton::Left, 80), NO_ACTION);
        // end is exclusive
        assert_eq!(ctx.action_at(MouseButton::Left, 100), NO_ACTION);
    }

    #[test]
    fn close_remaining_closes_all_in_alignment() {
        let mut ctx = ActionContext::new();
        ctx.open(MouseButton::Left, "a".into(), Alignment::Left, 0);
        ctx.open(MouseButton::Middle, "b".into(), Alignment::Left, 2);
        ctx.open(MouseButton::Left, "c".into(), Alignment::Center, 0);
        assert_eq!(ctx.close_remaining(Alignment::Left, 10), 2);
        assert_eq!(ctx.num_unclosed(), 1);
    }

    #[test]
    fn double_click_query() {
        let mut ctx = ActionContext::new();
        ctx.open(MouseButton::Left, "a".into(), Alignment::Left, 0);
        assert!(!ctx.has_double_click());
        ctx.open(MouseButton::DoubleLeft, "b".into(), Alignment::Left, 0);
        assert!(ctx.has_double_click());
    }
}
