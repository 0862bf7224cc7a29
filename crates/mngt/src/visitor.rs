//! Ordered traversal over a cache stack with compensating rollback.
//!
//! Multi-instance operations apply an action to every member in a fixed
//! direction. When the action fails partway, the members already visited are
//! undone in reverse order so the stack is left exactly as it was found.

/// Traversal direction over a stack slice ordered bottom to top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    BottomUp,
    TopDown,
}

/// Applies `action` to each member in `direction`. On the first failure,
/// runs `rollback` over the already-visited members in reverse visit order
/// and returns the error.
pub fn visit<T, E>(
    members: &[T],
    direction: Direction,
    mut action: impl FnMut(&T) -> Result<(), E>,
    mut rollback: impl FnMut(&T),
) -> Result<(), E> {
    let order: Vec<&T> = match direction {
        Direction::BottomUp => members.iter().collect(),
        Direction::TopDown => members.iter().rev().collect(),
    };
    for (visited, &member) in order.iter().enumerate() {
        if let Err(err) = action(member) {
            for &done in order[..visited].iter().rev() {
                rollback(done);
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn bottom_up_visits_in_member_order() {
        let seen = RefCell::new(Vec::new());
        let result: Result<(), ()> = visit(
            &[1, 2, 3],
            Direction::BottomUp,
            |m| {
                seen.borrow_mut().push(*m);
                Ok(())
            },
            |_| panic!("no rollback on success"),
        );
        assert!(result.is_ok());
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn top_down_visits_in_reverse() {
        let seen = RefCell::new(Vec::new());
        let result: Result<(), ()> = visit(
            &[1, 2, 3],
            Direction::TopDown,
            |m| {
                seen.borrow_mut().push(*m);
                Ok(())
            },
            |_| {},
        );
        assert!(result.is_ok());
        assert_eq!(*seen.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn failure_rolls_back_visited_members_in_reverse() {
        let rolled = RefCell::new(Vec::new());
        let result = visit(
            &[1, 2, 3, 4],
            Direction::BottomUp,
            |m| if *m == 3 { Err("boom") } else { Ok(()) },
            |m| rolled.borrow_mut().push(*m),
        );
        assert_eq!(result, Err("boom"));
        assert_eq!(*rolled.borrow(), vec![2, 1]);
    }

    #[test]
    fn failure_on_first_member_rolls_back_nothing() {
        let rolled = RefCell::new(Vec::new());
        let result = visit(
            &[1, 2],
            Direction::TopDown,
            |_| Err::<(), _>("boom"),
            |m| rolled.borrow_mut().push(*m),
        );
        assert_eq!(result, Err("boom"));
        assert!(rolled.borrow().is_empty());
    }

    #[test]
    fn empty_stack_is_a_no_op() {
        let result: Result<(), ()> = visit(
            &[] as &[i32],
            Direction::BottomUp,
            |_| panic!("no members"),
            |_| panic!("no members"),
        );
        assert!(result.is_ok());
    }
}
