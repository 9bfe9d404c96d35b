//! Two-sided tagged messaging.
//!
//! Every call funnels into one send path and one receive path. Sends carry a
//! tag built from the domain's transport identifier plus [`MSG_TAG_BIT`], so
//! receivers can tell this channel apart from other traffic on the same
//! matched queue and can select a specific sender by identifier.
//!
//! Only single-buffer transfers are supported: vector and message variants
//! must describe exactly one segment.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::context::OpContext;
use crate::endpoint::{Endpoint, EndpointShared};
use crate::error::{ProviderError, Result};
use crate::flags::{completion_suppressed, OpFlags, OpKind};
use crate::pool::InFlight;
use crate::transport::{NativeHandle, PeerAddr, RequestToken, TagMatch, TransportStatus};

/// Marker bit present in the tag of every message on this channel.
pub const MSG_TAG_BIT: u64 = 1 << 63;

/// Tag carried by sends from the transport context `local_id`.
pub fn send_tag(local_id: u64) -> u64 {
    local_id | MSG_TAG_BIT
}

/// Matcher for a receive from `source`, or from anyone on the channel.
pub fn recv_matcher(source: Option<u64>) -> TagMatch {
    match source {
        Some(id) => TagMatch { tag: id | MSG_TAG_BIT, selector: u64::MAX },
        None => TagMatch { tag: MSG_TAG_BIT, selector: MSG_TAG_BIT },
    }
}

/// Send description for [`MessagingEndpoint::sendmsg`].
#[derive(Debug, Default)]
pub struct SendMsg<'a> {
    /// Buffer segments. Exactly one is supported.
    pub iov: &'a [Bytes],
    /// Destination address.
    pub dest: Option<PeerAddr>,
    /// Completion context.
    pub context: Option<&'a mut OpContext>,
}

/// Receive description for [`MessagingEndpoint::recvmsg`].
#[derive(Debug, Default)]
pub struct RecvMsg<'a> {
    /// Buffer segments. Exactly one is supported.
    pub iov: Vec<BytesMut>,
    /// Source to match, or `None` to accept any sender.
    pub src: Option<PeerAddr>,
    /// Completion context.
    pub context: Option<&'a mut OpContext>,
}

/// Send and receive operations of a messaging endpoint.
///
/// Sends return the number of bytes handed off when they complete
/// synchronously (blocking mode) and `0` when the transfer finishes later
/// and is reported through the completion path.
pub trait MessagingEndpoint {
    /// Send to the connected peer.
    fn send(&self, buf: Bytes, context: Option<&mut OpContext>) -> Result<usize>;

    /// Send one segment to the connected peer.
    fn sendv(&self, iov: &[Bytes], context: Option<&mut OpContext>) -> Result<usize>;

    /// Send to an explicit destination.
    fn sendto(&self, buf: Bytes, dest: PeerAddr, context: Option<&mut OpContext>) -> Result<usize>;

    /// Send as described by `msg`, with per-call flags.
    fn sendmsg(&self, msg: SendMsg<'_>, flags: OpFlags) -> Result<usize>;

    /// Receive from the connected peer, or from anyone when unconnected.
    fn recv(&self, buf: BytesMut, context: Option<&mut OpContext>) -> Result<()>;

    /// Receive into one segment. Source selection as for [`Self::recv`].
    fn recvv(&self, iov: Vec<BytesMut>, context: Option<&mut OpContext>) -> Result<()>;

    /// Receive from `src`, or from anyone when `src` is `None`.
    fn recvfrom(
        &self,
        buf: BytesMut,
        src: Option<PeerAddr>,
        context: Option<&mut OpContext>,
    ) -> Result<()>;

    /// Receive as described by `msg`, with per-call flags.
    fn recvmsg(&self, msg: RecvMsg<'_>, flags: OpFlags) -> Result<()>;
}

fn single_segment<T: Clone>(iov: &[T]) -> Result<T> {
    match iov {
        [one] => Ok(one.clone()),
        _ => Err(ProviderError::invalid("exactly one buffer segment is supported")),
    }
}

fn single_owned_segment<T>(iov: Vec<T>) -> Result<T> {
    match <[T; 1]>::try_from(iov) {
        Ok([one]) => Ok(one),
        Err(_) => Err(ProviderError::invalid("exactly one buffer segment is supported")),
    }
}

impl Endpoint {
    /// Fill in `context` and take a descriptor for a tracked operation.
    ///
    /// Returns `None` when the endpoint runs without context tracking.
    fn track<'c>(
        &self,
        shared: &EndpointShared,
        kind: OpKind,
        flags: OpFlags,
        context: Option<&'c mut OpContext>,
    ) -> Result<Option<(RequestToken, &'c mut OpContext)>> {
        if !self.uses_context() {
            return Ok(None);
        }
        let context = context.ok_or(ProviderError::invalid("operation context is required"))?;
        // Checked against the endpoint that issued the previous operation,
        // which need not be this one.
        if context.in_flight() {
            return Err(ProviderError::invalid("context is still tracking an operation"));
        }

        let binding = shared.binding.read().clone();
        let suppress = completion_suppressed(binding.completion_mask, flags);
        context.prepare(kind, suppress, binding.cq);

        let entry = InFlight { kind, user_data: context.user_data, suppress, native: None };
        match shared.pool.acquire(entry) {
            Ok(handle) => Ok(Some((RequestToken { endpoint: self.id(), handle }, context))),
            Err(err) => {
                context.reset();
                shared.metrics.inc_pool_exhausted();
                Err(err)
            }
        }
    }

    /// Record the transport's answer for a tracked operation, undoing the
    /// tracking when the transport refused it.
    fn settle(
        shared: &Arc<EndpointShared>,
        tracked: Option<(RequestToken, &mut OpContext)>,
        issued: std::result::Result<NativeHandle, TransportStatus>,
    ) -> Result<()> {
        match (issued, tracked) {
            (Ok(native), Some((token, context))) => {
                shared.pool.attach_native(token.handle, native);
                context.attach(shared, token, native);
                Ok(())
            }
            (Ok(_), None) => Ok(()),
            (Err(status), tracked) => {
                if let Some((token, context)) = tracked {
                    shared.pool.release(token.handle);
                    context.reset();
                }
                shared.metrics.inc_issue_errors();
                Err(status.into())
            }
        }
    }

    fn send_inner(
        &self,
        buf: Bytes,
        dest: PeerAddr,
        context: Option<&mut OpContext>,
        flags: OpFlags,
    ) -> Result<usize> {
        let shared = self.shared()?;
        let transport = self.transport();
        let tag = send_tag(transport.local_id());
        let len = buf.len();

        if (self.default_flags() | flags).contains(OpFlags::BLOCK) {
            return match transport.send(dest, tag, &buf) {
                Ok(()) => {
                    shared.metrics.record_send(len, true);
                    debug!("Endpoint {} sent {} bytes to {:?} (blocking)", self.id(), len, dest);
                    Ok(len)
                }
                Err(status) => {
                    shared.metrics.inc_issue_errors();
                    Err(status.into())
                }
            };
        }

        let tracked = self.track(shared, OpKind::Send, flags, context)?;
        let token = tracked.as_ref().map(|(token, _)| *token);
        let issued = transport.send_async(dest, tag, buf, token);
        Self::settle(shared, tracked, issued)?;

        shared.metrics.record_send(len, false);
        debug!("Endpoint {} issued {} byte send to {:?} token={:?}", self.id(), len, dest, token);
        Ok(0)
    }

    fn recv_inner(
        &self,
        buf: BytesMut,
        src: Option<PeerAddr>,
        context: Option<&mut OpContext>,
        flags: OpFlags,
    ) -> Result<()> {
        let shared = self.shared()?;
        let transport = self.transport();
        let source = match src {
            Some(addr) => Some(transport.resolve_peer(addr)?),
            None => None,
        };
        let matcher = recv_matcher(source);

        let tracked = self.track(shared, OpKind::Recv, flags, context)?;
        let token = tracked.as_ref().map(|(token, _)| *token);
        let issued = transport.recv_async(matcher, buf, token);
        Self::settle(shared, tracked, issued)?;

        shared.metrics.record_recv_posted();
        debug!("Endpoint {} posted receive {:?} token={:?}", self.id(), matcher, token);
        Ok(())
    }

    fn connected_peer(&self) -> Result<PeerAddr> {
        self.peer().ok_or(ProviderError::NotConnected)
    }
}

impl MessagingEndpoint for Endpoint {
    fn send(&self, buf: Bytes, context: Option<&mut OpContext>) -> Result<usize> {
        let dest = self.connected_peer()?;
        self.send_inner(buf, dest, context, OpFlags::empty())
    }

    fn sendv(&self, iov: &[Bytes], context: Option<&mut OpContext>) -> Result<usize> {
        let buf = single_segment(iov)?;
        self.send(buf, context)
    }

    fn sendto(&self, buf: Bytes, dest: PeerAddr, context: Option<&mut OpContext>) -> Result<usize> {
        self.send_inner(buf, dest, context, OpFlags::empty())
    }

    fn sendmsg(&self, msg: SendMsg<'_>, flags: OpFlags) -> Result<usize> {
        let buf = single_segment(msg.iov)?;
        let dest = msg.dest.ok_or(ProviderError::invalid("message destination is required"))?;
        self.send_inner(buf, dest, msg.context, flags)
    }

    fn recv(&self, buf: BytesMut, context: Option<&mut OpContext>) -> Result<()> {
        self.recv_inner(buf, self.peer(), context, OpFlags::empty())
    }

    fn recvv(&self, iov: Vec<BytesMut>, context: Option<&mut OpContext>) -> Result<()> {
        let buf = single_owned_segment(iov)?;
        self.recv(buf, context)
    }

    fn recvfrom(
        &self,
        buf: BytesMut,
        src: Option<PeerAddr>,
        context: Option<&mut OpContext>,
    ) -> Result<()> {
        self.recv_inner(buf, src, context, OpFlags::empty())
    }

    fn recvmsg(&self, msg: RecvMsg<'_>, flags: OpFlags) -> Result<()> {
        let buf = single_owned_segment(msg.iov)?;
        self.recv_inner(buf, msg.src, msg.context, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_tag_sets_channel_bit() {
        assert_eq!(send_tag(5), MSG_TAG_BIT | 5);
        assert_eq!(send_tag(MSG_TAG_BIT | 5), MSG_TAG_BIT | 5);
    }

    #[test]
    fn test_recv_matcher_exact() {
        let m = recv_matcher(Some(7));
        assert_eq!(m.tag, MSG_TAG_BIT | 7);
        assert_eq!(m.selector, u64::MAX);
        assert!(m.matches(send_tag(7)));
        assert!(!m.matches(send_tag(8)));
    }

    #[test]
    fn test_recv_matcher_wildcard() {
        let m = recv_matcher(None);
        assert_eq!(m.tag, MSG_TAG_BIT);
        assert_eq!(m.selector, MSG_TAG_BIT);
        assert!(m.matches(send_tag(1)));
        assert!(m.matches(send_tag(12345)));
        assert!(!m.matches(12345));
    }

    #[test]
    fn test_single_segment() {
        let one = [Bytes::from_static(b"a")];
        assert_eq!(single_segment(&one).unwrap(), Bytes::from_static(b"a"));

        let none: [Bytes; 0] = [];
        assert!(single_segment(&none).is_err());

        let two = [Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        assert!(single_segment(&two).is_err());
    }

    #[test]
    fn test_single_owned_segment() {
        assert!(single_owned_segment::<BytesMut>(Vec::new()).is_err());
        assert!(single_owned_segment(vec![BytesMut::new(), BytesMut::new()]).is_err());
        assert_eq!(single_owned_segment(vec![BytesMut::zeroed(4)]).unwrap().len(), 4);
    }
}
