// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory resumption state: TLS session tickets and NEW_TOKEN
//! address validation tokens, keyed by server name.
//!
//! Nothing here touches disk; state lives exactly as long as the
//! process.

use alloc::{collections::VecDeque, string::String};
use bytes::Bytes;
use hashbrown::HashMap;

/// Tickets or tokens stored per server, newest last
#[derive(Debug)]
pub struct Cache {
    entries: HashMap<String, VecDeque<Bytes>>,
    per_server: usize,
}

impl Cache {
    pub fn new(per_server: usize) -> Self {
        debug_assert!(per_server > 0);
        Self {
            entries: HashMap::new(),
            per_server,
        }
    }

    /// Stores a value for `server_name`, evicting the oldest at capacity
    pub fn insert(&mut self, server_name: &str, value: Bytes) {
        let queue = self
            .entries
            .entry(String::from(server_name))
            .or_insert_with(VecDeque::new);
        while queue.len() >= self.per_server {
            queue.pop_front();
        }
        queue.push_back(value);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1.3
    //# A token SHOULD NOT be reused.
    /// Takes the newest stored value for `server_name`
    pub fn take(&mut self, server_name: &str) -> Option<Bytes> {
        let queue = self.entries.get_mut(server_name)?;
        let value = queue.pop_back();
        if queue.is_empty() {
            self.entries.remove(server_name);
        }
        value
    }

    #[inline]
    pub fn len(&self, server_name: &str) -> usize {
        self.entries.get(server_name).map_or(0, VecDeque::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(4)
    }
}
