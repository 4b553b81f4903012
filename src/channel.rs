//! Wrapper to in-memory channels.
//!
//! This module exists to ease the transition between channel libraries.

use std::time::Duration;

use flume::{
    bounded as bounded_ext, unbounded as unbounded_ext, Receiver as ReceiverExt,
    RecvError as ExtRecvError, RecvTimeoutError as ExtRecvTimeoutError,
    SendError as SendErrorExt, Sender as SenderExt, TryRecvError as ExtTryRecvError,
};

pub trait ChannelItem: Send + 'static {}
impl<T: Send + 'static> ChannelItem for T {}

pub type SendError<T> = SendErrorExt<T>;
pub type RecvError = ExtRecvError;
pub type RecvTimeoutError = ExtRecvTimeoutError;
pub type TryRecvError = ExtTryRecvError;

/// Crate a new pair sender/receiver with limited capacity.
pub(crate) fn bounded<T: ChannelItem>(size: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = bounded_ext(size);
    (Sender(tx), Receiver(rx))
}

/// Crate a new pair sender/receiver with unlimited capacity.
pub(crate) fn unbounded<T: ChannelItem>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    let (tx, rx) = unbounded_ext();
    (UnboundedSender(tx), UnboundedReceiver(rx))
}

/// A wrapper on a bounded channel sender.
#[derive(Debug)]
pub(crate) struct Sender<T: ChannelItem>(SenderExt<T>);
/// A wrapper on a bounded channel receiver.
#[derive(Debug)]
pub(crate) struct Receiver<T: ChannelItem>(ReceiverExt<T>);

impl<T: ChannelItem> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ChannelItem> Sender<T> {
    /// Send a message in the channel, blocking if it's full.
    #[inline]
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.0.send(item)
    }
}

impl<T: ChannelItem> Receiver<T> {
    /// Block until a message is present in the channel and return it when ready.
    #[inline]
    pub fn recv(&self) -> Result<T, RecvError> {
        self.0.recv()
    }
}

/// A wrapper on an unbounded channel sender.
#[derive(Debug)]
pub(crate) struct UnboundedSender<T: ChannelItem>(SenderExt<T>);
/// A wrapper on an unbounded channel receiver.
///
/// This is how the results of a pipeline are handed to the caller.
#[derive(Debug)]
pub struct UnboundedReceiver<T: ChannelItem>(ReceiverExt<T>);

impl<T: ChannelItem> Clone for UnboundedSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ChannelItem> Clone for UnboundedReceiver<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ChannelItem> UnboundedSender<T> {
    /// Send a message in the channel.
    #[inline]
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.0.send(item)
    }
}

impl<T: ChannelItem> UnboundedReceiver<T> {
    /// Block until a message is present in the channel and return it when ready.
    #[inline]
    pub fn recv(&self) -> Result<T, RecvError> {
        self.0.recv()
    }

    /// Like `recv`, but without blocking.
    #[inline]
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.0.try_recv()
    }

    /// Block until a message is present in the channel and return it when ready.
    ///
    /// If the timeout expires an error is returned.
    #[inline]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.0.recv_timeout(timeout)
    }

    /// Iterate over the messages until every sender is gone.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.0.iter()
    }

    /// Iterate over the messages already in the channel.
    pub fn try_iter(&self) -> impl Iterator<Item = T> + '_ {
        self.0.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::channel::{bounded, unbounded};

    const CHANNEL_CAPACITY: usize = 10;

    #[test]
    fn test_recv_local() {
        let (sender, receiver) = bounded(CHANNEL_CAPACITY);

        sender.send(123).unwrap();
        sender.send(456).unwrap();

        drop(sender);

        assert_eq!(receiver.recv().unwrap(), 123);
        assert_eq!(receiver.recv().unwrap(), 456);
        // sender has dropped
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_recv_timeout_unbounded() {
        let (sender, receiver) = unbounded();

        sender.send(123).unwrap();

        assert_eq!(
            receiver.recv_timeout(Duration::from_millis(1)).unwrap(),
            123
        );

        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());

        sender.send(456).unwrap();
        drop(sender);
        assert_eq!(receiver.iter().collect::<Vec<_>>(), vec![456]);
    }

    #[test]
    fn clone_without_clone_items() {
        #[derive(Debug, PartialEq)]
        struct NotClone(u32);

        let (sender, receiver) = unbounded();
        let other_sender = sender.clone();
        let other_receiver = receiver.clone();
        sender.send(NotClone(1)).unwrap();
        other_sender.send(NotClone(2)).unwrap();
        drop((sender, other_sender));
        assert_eq!(receiver.recv().unwrap(), NotClone(1));
        assert_eq!(other_receiver.iter().collect::<Vec<_>>(), vec![NotClone(2)]);
    }
}
