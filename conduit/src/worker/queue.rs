use std::collections::VecDeque;
use std::mem;

/// Work item for the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRequest {
    Draw,
    Resize { width: u32, height: u32 },
}

/// FIFO that holds at most one pending request of each kind.
///
/// Offering a request removes the pending one of the same kind and appends
/// the new one, so the most recent wins and takes the back of the line.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    items: VecDeque<FrameRequest>,
}

impl RequestQueue {
    /// Returns `true` when a pending request of the same kind was replaced.
    pub fn offer(&mut self, request: FrameRequest) -> bool {
        let kind = mem::discriminant(&request);
        let before = self.items.len();
        self.items.retain(|item| mem::discriminant(item) != kind);
        let replaced = self.items.len() != before;
        self.items.push_back(request);
        replaced
    }

    pub fn poll(&mut self) -> Option<FrameRequest> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_is_coalesced() {
        let mut queue = RequestQueue::default();
        assert!(!queue.offer(FrameRequest::Draw));
        assert!(queue.offer(FrameRequest::Draw));
        assert!(queue.offer(FrameRequest::Draw));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll(), Some(FrameRequest::Draw));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn resize_is_last_writer_wins() {
        let mut queue = RequestQueue::default();
        queue.offer(FrameRequest::Resize { width: 640, height: 480 });
        queue.offer(FrameRequest::Draw);
        queue.offer(FrameRequest::Resize { width: 320, height: 240 });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll(), Some(FrameRequest::Draw));
        assert_eq!(
            queue.poll(),
            Some(FrameRequest::Resize { width: 320, height: 240 })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn re_offered_draw_moves_to_the_back() {
        let mut queue = RequestQueue::default();
        queue.offer(FrameRequest::Draw);
        queue.offer(FrameRequest::Resize { width: 1, height: 1 });
        queue.offer(FrameRequest::Draw);

        assert_eq!(queue.poll(), Some(FrameRequest::Resize { width: 1, height: 1 }));
        assert_eq!(queue.poll(), Some(FrameRequest::Draw));
    }
}
