//! Visual data frames.
//!
//! The server streams one VisualData message per visible body and closes
//! each frame with a VisualData addressed to `server_id = -1`. The buffer
//! assembles these into whole frames and keeps a short history so a
//! renderer can interpolate between the last two.

use std::collections::VecDeque;

use unisim_shared::{
    body::{PhysId, NO_BODY},
    math::{Vec3, Vec4},
    message::{Message, MessageBody},
};

#[derive(Debug, Clone, PartialEq)]
pub struct VisBody {
    pub phys_id: PhysId,
    pub radius: f64,
    /// Relative to the subscriber's body.
    pub position: Vec3,
    pub orientation: Vec4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisFrame {
    pub bodies: Vec<VisBody>,
}

impl VisFrame {
    pub fn get(&self, id: PhysId) -> Option<&VisBody> {
        self.bodies.iter().find(|b| b.phys_id == id)
    }
}

#[derive(Debug, Default)]
pub struct VisFrameBuffer {
    pending: Vec<VisBody>,
    history: VecDeque<VisFrame>,
    max: usize,
}

impl VisFrameBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            pending: Vec::new(),
            history: VecDeque::new(),
            max: max.max(1),
        }
    }

    /// Feeds one message. Returns true when it completed a frame.
    /// Messages of other kinds are ignored.
    pub fn push(&mut self, msg: &Message) -> bool {
        let MessageBody::VisualData(v) = &msg.body else {
            return false;
        };
        if msg.server_id == Some(NO_BODY) {
            self.history.push_back(VisFrame {
                bodies: std::mem::take(&mut self.pending),
            });
            while self.history.len() > self.max {
                self.history.pop_front();
            }
            return true;
        }
        if let (Some(phys_id), Some(position)) = (v.phys_id, v.position) {
            self.pending.push(VisBody {
                phys_id,
                radius: v.radius.unwrap_or(0.0),
                position,
                orientation: v.orientation.unwrap_or_default(),
            });
        }
        false
    }

    /// Returns the number of complete frames buffered.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn latest(&self) -> Option<&VisFrame> {
        self.history.back()
    }

    /// Position of `id` between the last two frames.
    ///
    /// `alpha` should be in $[0,1]$ where 0 = older frame, 1 = newer.
    pub fn interp_body(&self, id: PhysId, alpha: f64) -> Option<Vec3> {
        if self.history.len() < 2 {
            return None;
        }
        let a = self.history[self.history.len() - 2].get(id)?;
        let b = self.history[self.history.len() - 1].get(id)?;
        Some(a.position.lerp(b.position, alpha))
    }
}

#[cfg(test)]
mod tests {
    use unisim_shared::message::VisualData;

    use super::*;

    fn body(id: PhysId, x: f64) -> Message {
        Message::new(MessageBody::VisualData(VisualData {
            phys_id: Some(id),
            radius: Some(1.0),
            position: Some(Vec3::new(x, 0.0, 0.0)),
            orientation: None,
        }))
        .with_server_id(5)
    }

    fn end() -> Message {
        Message::new(MessageBody::VisualData(VisualData::default())).with_server_id(NO_BODY)
    }

    #[test]
    fn frames_close_on_the_end_marker() {
        let mut buf = VisFrameBuffer::new(4);
        assert!(!buf.push(&body(1, 0.0)));
        assert!(!buf.push(&body(2, 5.0)));
        assert!(buf.is_empty());
        assert!(buf.push(&end()));
        assert_eq!(buf.latest().unwrap().bodies.len(), 2);
        assert!(!buf.push(&Message::new(MessageBody::Hello)));
    }

    #[test]
    fn interpolates_between_last_two_frames() {
        let mut buf = VisFrameBuffer::new(2);
        for x in [0.0, 2.0, 4.0] {
            buf.push(&body(1, x));
            buf.push(&end());
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.interp_body(1, 0.5), Some(Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(buf.interp_body(9, 0.5), None);
    }
}
