// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{
        key::Key,
        key_schedule::{expand_level_keys, next_generation_secret, LevelKeys},
        packet_protection,
        CipherSuite, Provider, Secret,
    },
    endpoint,
    packet::KeyPhase,
    time::{Timer, Timestamp},
};
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9001#section-6
//# Once the handshake is confirmed, it is possible to update the keys.

/// The 1-RTT key state: current-phase keys, standby next-generation keys,
/// and a briefly retained prior generation for reordered packets.
pub struct OneRttKeys<P: Provider> {
    suite: CipherSuite,
    phase: KeyPhase,

    seal_secret: Secret,
    open_secret: Secret,

    sealer: LevelKeys<P>,
    opener: LevelKeys<P>,

    /// Opener for the next phase, derived eagerly so a peer-initiated
    /// update can be tried without blocking on HKDF
    next_opener: LevelKeys<P>,

    /// Prior-phase opener kept around for one PTO after an update
    prior_opener: Option<LevelKeys<P>>,
    retire_timer: Timer,

    /// Packets sealed with the current keys, checked against the AEAD
    /// confidentiality limit
    sealed_packets: u64,
    /// Failed opens with the current keys, checked against the AEAD
    /// integrity limit
    failed_opens: u64,

    /// Largest packet number successfully opened with the current phase
    largest_opened: Option<u64>,
}

impl<P: Provider> OneRttKeys<P> {
    pub fn new(
        provider: &P,
        suite: CipherSuite,
        local: endpoint::Type,
        client_secret: Secret,
        server_secret: Secret,
    ) -> Self {
        let (seal_secret, open_secret) = match local {
            endpoint::Type::Client => (client_secret, server_secret),
            endpoint::Type::Server => (server_secret, client_secret),
        };

        let sealer = expand_level_keys(provider, suite, &seal_secret);
        let opener = expand_level_keys(provider, suite, &open_secret);
        let next_open_secret = next_generation_secret(provider, suite, &open_secret);
        let next_opener = expand_level_keys(provider, suite, &next_open_secret);

        Self {
            suite,
            phase: KeyPhase::Zero,
            seal_secret,
            open_secret,
            sealer,
            opener,
            next_opener,
            prior_opener: None,
            retire_timer: Timer::default(),
            sealed_packets: 0,
            failed_opens: 0,
            largest_opened: None,
        }
    }

    #[inline]
    pub fn phase(&self) -> KeyPhase {
        self.phase
    }

    #[inline]
    pub fn sealer(&self) -> &LevelKeys<P> {
        &self.sealer
    }

    #[inline]
    pub fn opener(&self) -> &LevelKeys<P> {
        &self.opener
    }

    /// Records a sealed packet; returns true when the confidentiality
    /// limit requires a key update before further sealing
    #[inline]
    pub fn on_packet_sealed(&mut self) -> bool {
        self.sealed_packets += 1;
        self.sealed_packets >= self.sealer.key.confidentiality_limit()
    }

    /// Records a failed open; returns true when the integrity limit was
    /// exceeded and the connection must close with AEAD_LIMIT_REACHED
    #[inline]
    pub fn on_open_failed(&mut self) -> bool {
        self.failed_opens += 1;
        self.failed_opens >= self.opener.key.integrity_limit()
    }

    /// Attempts to open a 1-RTT payload, honoring the packet's key phase.
    ///
    /// A differing phase bit on a packet newer than anything opened with
    /// the current keys is treated as a peer-initiated key update: the
    /// next-generation opener is tried, and on success the whole state
    /// advances a phase.
    pub fn open(
        &mut self,
        provider: &P,
        phase: KeyPhase,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
        now: Timestamp,
        retire_after: Duration,
    ) -> Result<(usize, bool), packet_protection::Error> {
        if phase == self.phase {
            let len = self.opener.key.decrypt(packet_number, header, payload)?;
            self.largest_opened = Some(self.largest_opened.map_or(packet_number, |largest| {
                largest.max(packet_number)
            }));
            return Ok((len, false));
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.3
        //# An endpoint
        //# can use the prior keys to decrypt a reordered packet with a lower
        //# packet number than any packet it has received with the current keys.
        if self
            .largest_opened
            .is_some_and(|largest| packet_number < largest)
        {
            let prior = self
                .prior_opener
                .as_ref()
                .ok_or(packet_protection::Error::DECRYPT_ERROR)?;
            let len = prior.key.decrypt(packet_number, header, payload)?;
            return Ok((len, false));
        }

        // a newer packet in the other phase: try the next generation
        let len = self.next_opener.key.decrypt(packet_number, header, payload)?;
        self.advance_phase(provider, now, retire_after);
        self.largest_opened = Some(packet_number);
        Ok((len, true))
    }

    /// Initiates a local key update (e.g. on nearing the confidentiality
    /// limit)
    pub fn initiate_update(&mut self, provider: &P, now: Timestamp, retire_after: Duration) {
        self.advance_phase(provider, now, retire_after);
    }

    fn advance_phase(&mut self, provider: &P, now: Timestamp, retire_after: Duration) {
        self.phase = self.phase.next();

        self.seal_secret = next_generation_secret(provider, self.suite, &self.seal_secret);
        self.open_secret = next_generation_secret(provider, self.suite, &self.open_secret);

        let new_sealer = expand_level_keys(provider, self.suite, &self.seal_secret);
        let new_opener = expand_level_keys(provider, self.suite, &self.open_secret);
        let next_open_secret = next_generation_secret(provider, self.suite, &self.open_secret);
        let new_next_opener = expand_level_keys(provider, self.suite, &next_open_secret);

        self.sealer = new_sealer;
        let retired = core::mem::replace(&mut self.opener, new_opener);
        self.prior_opener = Some(retired);
        self.next_opener = new_next_opener;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.5
        //# An endpoint SHOULD retain old read keys for no more than three
        //# times the PTO after having received a packet protected using the
        //# new keys.
        self.retire_timer.set(now + retire_after);

        self.sealed_packets = 0;
        self.failed_opens = 0;
        self.largest_opened = None;
    }

    /// Drops the prior-generation opener once its retention window lapses
    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.retire_timer.poll_expiration(now).is_ready() {
            self.prior_opener = None;
        }
    }

    #[inline]
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.retire_timer.next_expiration()
    }
}
