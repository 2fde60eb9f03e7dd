use super::{FilterFull, Ip};
use crate::config::RAW_FILTER_MAX_COUNT;
use crate::pkbuf::PacketBuffer;
use crate::raw::{self, Delivery, RawStats, RecvError};
use crate::wait::WaitOption;
use crate::wire::{IpProtocol, Ipv4Packet};

impl<'a> Ip<'a> {
    pub fn raw_enabled(&self) -> bool {
        self.raw_queue.is_open()
    }

    /// Start delivering unclaimed datagrams to the raw receive queue.
    pub fn raw_packet_enable(&self) {
        self.raw_queue.open();
        net_debug!("raw ip processing enabled");
    }

    /// Stop raw delivery.
    ///
    /// Queued raw packets are released and every suspended receiver
    /// returns [`RecvError::NotEnabled`].
    pub fn raw_packet_disable(&self) {
        let (released, woken) = self.raw_queue.close();
        net_debug!(
            "raw ip processing disabled ({} packets released, {} receivers woken)",
            released,
            woken
        );
    }

    /// Change the raw receive queue maximum. Returns the value applied.
    pub fn raw_receive_queue_max_set(&self, max: usize) -> usize {
        self.raw_queue.set_max(max)
    }

    /// Restrict raw delivery to `protocols`. An empty list accepts all.
    pub fn raw_packet_filter_set(&self, protocols: &[IpProtocol]) -> Result<(), FilterFull> {
        let filter: heapless::Vec<IpProtocol, RAW_FILTER_MAX_COUNT> =
            heapless::Vec::from_slice(protocols).map_err(|_| FilterFull)?;
        *self.raw_filter() = filter;
        Ok(())
    }

    pub fn raw_accepts(&self, protocol: IpProtocol) -> bool {
        let filter = self.raw_filter();
        filter.is_empty() || filter.contains(&protocol)
    }

    pub fn raw_stats(&self) -> RawStats {
        self.raw_queue.stats()
    }

    /// Offer an inbound datagram to the raw receive path.
    ///
    /// `pkbuf` must start at its IPv4 header. An accepted datagram is trimmed
    /// to its total length and queued with the header pulled, so `prepend`
    /// points at the IP payload. The packet comes back as `Err` when raw
    /// processing is off, the header does not parse, or the filter rejects
    /// its protocol, leaving it to the rest of the input path.
    pub fn raw_in(&self, mut pkbuf: PacketBuffer) -> Result<Delivery, PacketBuffer> {
        if !self.raw_enabled() {
            return Err(pkbuf);
        }

        let parsed = Ipv4Packet::new_checked(pkbuf.payload())
            .ok()
            .filter(|packet| packet.version() == 4)
            .map(|packet| {
                (
                    packet.header_len() as usize,
                    packet.total_len() as usize,
                    packet.next_header(),
                    packet.src_addr(),
                    packet.dst_addr(),
                )
            });
        let Some((header_len, total_len, protocol, src_addr, dst_addr)) = parsed else {
            net_trace!("raw: not an IPv4 datagram: {:?}", pkbuf);
            return Err(pkbuf);
        };

        if !self.raw_accepts(protocol) {
            net_trace!("raw: protocol {} filtered", protocol);
            return Err(pkbuf);
        }

        pkbuf.truncate(total_len);
        if pkbuf.pull_header(header_len).is_err() {
            return Err(pkbuf);
        }
        let delivery = self.raw_queue.enqueue(pkbuf);
        net_trace!(
            "raw: {} datagram {} -> {}: {:?}",
            protocol,
            src_addr,
            dst_addr,
            delivery
        );
        Ok(delivery)
    }

    /// Receive the next raw datagram without argument or caller checks.
    ///
    /// See [`crate::api::raw_packet_receive`] for the checked entry point.
    pub fn raw_packet_receive(&self, wait: WaitOption) -> Result<PacketBuffer, RecvError> {
        if !self.raw_enabled() {
            return Err(RecvError::NotEnabled);
        }
        raw::receive(&self.raw_queue, wait)
    }
}
