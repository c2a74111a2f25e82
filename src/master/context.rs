use crate::common::SlaveId;
use crate::error::Failure;

use std::collections::HashMap;
use tracing::warn;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PendingTransaction {
    pub transaction_id: u16,
    pub unit_id: SlaveId,
    pub function_code: u8,
}

//This struct is meant to hold the state of the on going modbus transactions
#[derive(Debug)]
pub struct TransactionTracker {
    current_transaction_id: u16,
    on_going_transactions: HashMap<u16, PendingTransaction>,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        TransactionTracker::new()
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        TransactionTracker::starting_at(1)
    }

    pub fn starting_at(first_transaction_id: u16) -> Self {
        TransactionTracker {
            current_transaction_id: first_transaction_id,
            on_going_transactions: HashMap::new(),
        }
    }

    pub fn next_id(&mut self) -> u16 {
        let result = self.current_transaction_id;
        self.current_transaction_id = result.wrapping_add(1);
        result
    }

    pub fn register(
        &mut self,
        transaction_id: u16,
        unit_id: SlaveId,
        function_code: u8,
    ) -> PendingTransaction {
        let pending = PendingTransaction {
            transaction_id,
            unit_id,
            function_code,
        };
        self.on_going_transactions.insert(transaction_id, pending);
        pending
    }

    /// Consumes the pending transaction answered by an inbound frame. The
    /// entry is dropped even when the unit id doesn't match.
    pub fn match_response(
        &mut self,
        transaction_id: u16,
        unit_id: SlaveId,
    ) -> Result<PendingTransaction, Failure> {
        let pending = self
            .on_going_transactions
            .remove(&transaction_id)
            .ok_or_else(|| {
                let expected: Vec<u16> = self.on_going_transactions.keys().copied().collect();
                warn!(transaction_id, ?expected, "response for unknown transaction");
                Failure::TransactionMismatch(format!(
                    "response carries transaction {}, outstanding {:?}",
                    transaction_id, expected
                ))
            })?;

        if pending.unit_id != unit_id {
            warn!(
                transaction_id,
                expected_unit = pending.unit_id,
                unit_id,
                "response from unexpected unit"
            );
            return Err(Failure::TransactionMismatch(format!(
                "transaction {} was sent to unit {}, response came from unit {}",
                transaction_id, pending.unit_id, unit_id
            )));
        }

        Ok(pending)
    }

    pub fn abandon(&mut self, transaction_id: u16) {
        self.on_going_transactions.remove(&transaction_id);
    }

    pub fn clear(&mut self) {
        self.on_going_transactions.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.on_going_transactions.len()
    }

    pub fn has_on_going_transactions(&self) -> bool {
        !self.on_going_transactions.is_empty()
    }
}
