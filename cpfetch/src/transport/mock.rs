//! Scripted in-memory channel for driving the pipeline in tests.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::channel::Channel;
use crate::error::{ChannelError, Result};

/// One scripted reaction of the remote side, consumed per poll.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Bytes become available on this poll.
    Data(Bytes),
    /// The next `n` polls see nothing.
    Silence(usize),
    /// The next poll fails.
    Fail,
}

impl Reply {
    pub(crate) fn text(s: &str) -> Self {
        Reply::Data(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// A channel that replays a script, and appends more script when a line
/// matching a trigger is sent.
#[derive(Debug, Default)]
pub(crate) struct ScriptedChannel {
    script: VecDeque<Reply>,
    triggers: Vec<(String, Vec<Reply>)>,
    pending: BytesMut,
    pub(crate) sent: Vec<String>,
    pub(crate) polls: usize,
    pub(crate) last_data_poll: usize,
    pub(crate) bytes_delivered: usize,
    pub(crate) closed: bool,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue replies that play immediately.
    pub(crate) fn then(mut self, reply: Reply) -> Self {
        self.script.push_back(reply);
        self
    }

    /// Queue replies that play once `line` has been sent.
    pub(crate) fn on_send(mut self, line: &str, replies: Vec<Reply>) -> Self {
        self.triggers.push((line.to_string(), replies));
        self
    }

    /// Lines sent so far, without terminators.
    pub(crate) fn sent_lines(&self) -> Vec<&str> {
        self.sent.iter().map(|s| s.trim_end_matches('\n')).collect()
    }
}

impl Channel for ScriptedChannel {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        let text = String::from_utf8_lossy(data).into_owned();
        let line = text.trim_end_matches(['\r', '\n']).to_string();
        self.sent.push(text);

        if let Some(pos) = self.triggers.iter().position(|(t, _)| *t == line) {
            let (_, replies) = self.triggers.remove(pos);
            self.script.extend(replies);
        }
        Ok(())
    }

    async fn data_available(&mut self) -> Result<bool> {
        self.polls += 1;
        if !self.pending.is_empty() {
            return Ok(true);
        }

        match self.script.pop_front() {
            Some(Reply::Data(data)) => {
                self.pending.extend_from_slice(&data);
                self.last_data_poll = self.polls;
                Ok(true)
            }
            Some(Reply::Silence(n)) => {
                if n > 1 {
                    self.script.push_front(Reply::Silence(n - 1));
                }
                Ok(false)
            }
            Some(Reply::Fail) => Err(ChannelError::ReadFailed("scripted failure".into()).into()),
            None => Ok(false),
        }
    }

    async fn receive(&mut self, max_bytes: usize) -> Result<Bytes> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        let n = self.pending.len().min(max_bytes);
        self.bytes_delivered += n;
        Ok(self.pending.split_to(n).freeze())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
