//! Capacity Reservation Ledger
//!
//! Per-client write credit. Credits are granted by the master's orchestration
//! messages and spent one per accepted write.

use dashmap::DashMap;
use std::net::IpAddr;

#[derive(Default)]
pub struct CapacityLedger {
    credits: DashMap<IpAddr, u64>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` credits to `client`, creating the counter if needed.
    pub fn grant(&self, client: IpAddr, amount: u64) {
        self.credits
            .entry(client)
            .and_modify(|credit| *credit = credit.saturating_add(amount))
            .or_insert(amount);
    }

    /// Spends one credit. Returns `false`, without mutating anything, if the
    /// client has none left.
    ///
    /// The read and the decrement happen under the same shard lock, so
    /// concurrent spenders can never drive a counter below zero.
    pub fn try_spend(&self, client: IpAddr) -> bool {
        match self.credits.get_mut(&client) {
            Some(mut credit) if *credit > 0 => {
                *credit -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn balance(&self, client: IpAddr) -> u64 {
        self.credits.get(&client).map(|credit| *credit).unwrap_or(0)
    }

    /// Number of clients that currently hold at least one credit.
    pub fn clients_with_credit(&self) -> usize {
        self.credits.iter().filter(|entry| *entry.value() > 0).count()
    }
}
