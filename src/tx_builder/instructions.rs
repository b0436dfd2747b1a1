//! Compute budget headers and ordering validation
//!
//! Every transaction the pipeline builds has the same shape:
//! 1. `set_compute_unit_limit`
//! 2. `set_compute_unit_price`
//! 3. program instructions
//!
//! Budget instructions anywhere else are rejected by [`sanity_check_header`].

use crate::tx_builder::errors::PackError;
use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

/// `ComputeBudgetInstruction::SetComputeUnitLimit` tag
const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
/// `ComputeBudgetInstruction::SetComputeUnitPrice` tag
const SET_COMPUTE_UNIT_PRICE: u8 = 3;

/// Build the two-instruction compute budget header
pub fn compute_budget_header(compute_units: u32, micro_lamports: u64) -> [Instruction; 2] {
    [
        ComputeBudgetInstruction::set_compute_unit_limit(compute_units),
        ComputeBudgetInstruction::set_compute_unit_price(micro_lamports),
    ]
}

/// Prefix `body` with a compute budget header
pub fn with_header(compute_units: u32, micro_lamports: u64, body: &[Instruction]) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(body.len() + 2);
    instructions.extend(compute_budget_header(compute_units, micro_lamports));
    instructions.extend_from_slice(body);
    instructions
}

fn budget_tag(ix: &Instruction) -> Option<u8> {
    if ix.program_id == solana_sdk::compute_budget::id() {
        ix.data.first().copied()
    } else {
        None
    }
}

/// Validate that `instructions` start with exactly one limit and one price
/// instruction and contain no other compute budget instruction.
pub fn sanity_check_header(instructions: &[Instruction]) -> Result<(), PackError> {
    if instructions.len() < 2 {
        return Err(PackError::invalid_order("Instruction list lacks a compute budget header"));
    }

    if budget_tag(&instructions[0]) != Some(SET_COMPUTE_UNIT_LIMIT) {
        return Err(PackError::invalid_order(format!(
            "First instruction must set the compute unit limit, got program_id: {}",
            instructions[0].program_id
        )));
    }
    if budget_tag(&instructions[1]) != Some(SET_COMPUTE_UNIT_PRICE) {
        return Err(PackError::invalid_order(format!(
            "Second instruction must set the compute unit price, got program_id: {}",
            instructions[1].program_id
        )));
    }

    for (idx, ix) in instructions.iter().enumerate().skip(2) {
        if budget_tag(ix).is_some() {
            return Err(PackError::invalid_order(format!(
                "Compute budget instruction after the header (position {idx})"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{instruction::AccountMeta, pubkey::Pubkey};

    fn program_ix() -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3, 4],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_header_order() {
        let ixs = with_header(200_000, 10_000, &[program_ix()]);
        assert_eq!(ixs.len(), 3);
        assert_eq!(ixs[0].program_id, solana_sdk::compute_budget::id());
        assert_eq!(ixs[0].data[0], SET_COMPUTE_UNIT_LIMIT);
        assert_eq!(ixs[1].data[0], SET_COMPUTE_UNIT_PRICE);
        assert!(sanity_check_header(&ixs).is_ok());
    }

    #[test]
    fn test_limit_encoding() {
        let [limit, price] = compute_budget_header(1_000_000, 250_000);
        assert_eq!(&limit.data[1..], &1_000_000u32.to_le_bytes());
        assert_eq!(&price.data[1..], &250_000u64.to_le_bytes());
    }

    #[test]
    fn test_rejects_missing_header() {
        assert!(sanity_check_header(&[program_ix()]).is_err());
        assert!(sanity_check_header(&[program_ix(), program_ix()]).is_err());
    }

    #[test]
    fn test_rejects_swapped_header() {
        let [limit, price] = compute_budget_header(1, 1);
        assert!(sanity_check_header(&[price, limit, program_ix()]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_budget_instruction() {
        let mut ixs = with_header(100, 1, &[program_ix()]);
        ixs.push(ComputeBudgetInstruction::set_compute_unit_price(5));
        let err = sanity_check_header(&ixs).unwrap_err();
        assert!(err.to_string().contains("position 3"));
    }
}
