//! Allow-listed decoder for token-program inner instructions.

use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use spl_token::instruction::TokenInstruction;
use spl_token::solana_program::program_option::COption;

/// Returns `true` if `program_id` is the SPL Token program.
#[must_use]
pub fn is_token_program(program_id: &Pubkey) -> bool {
    program_id.to_bytes() == spl_token::id().to_bytes()
}

fn key<K: AsRef<[u8]>>(k: K) -> String {
    bs58::encode(k).into_string()
}

fn account(accounts: &[Pubkey], i: usize) -> Option<String> {
    accounts.get(i).map(ToString::to_string)
}

/// Decodes a token instruction into an event name and JSON payload.
///
/// Only Transfer, TransferChecked, MintTo, MintToChecked, Burn, BurnChecked,
/// InitializeMint2 and InitializeAccount3 are recognised. Every other
/// instruction, unknown opcodes, and instructions with fewer accounts than
/// their layout requires yield `None`.
#[allow(deprecated)]
#[must_use]
pub fn decode_token_instruction(
    data: &[u8],
    accounts: &[Pubkey],
) -> Option<(&'static str, serde_json::Value)> {
    let instruction = TokenInstruction::unpack(data).ok()?;

    match instruction {
        TokenInstruction::Transfer { amount } => Some((
            "Transfer",
            json!({
                "source": account(accounts, 0)?,
                "destination": account(accounts, 1)?,
                "authority": account(accounts, 2)?,
                "amount": amount,
            }),
        )),
        TokenInstruction::TransferChecked { amount, decimals } => Some((
            "TransferChecked",
            json!({
                "source": account(accounts, 0)?,
                "mint": account(accounts, 1)?,
                "destination": account(accounts, 2)?,
                "authority": account(accounts, 3)?,
                "amount": amount,
                "decimals": decimals,
            }),
        )),
        TokenInstruction::MintTo { amount } => Some((
            "MintTo",
            json!({
                "mint": account(accounts, 0)?,
                "destination": account(accounts, 1)?,
                "authority": account(accounts, 2)?,
                "amount": amount,
            }),
        )),
        TokenInstruction::MintToChecked { amount, decimals } => Some((
            "MintToChecked",
            json!({
                "mint": account(accounts, 0)?,
                "destination": account(accounts, 1)?,
                "authority": account(accounts, 2)?,
                "amount": amount,
                "decimals": decimals,
            }),
        )),
        TokenInstruction::Burn { amount } => Some((
            "Burn",
            json!({
                "account": account(accounts, 0)?,
                "mint": account(accounts, 1)?,
                "authority": account(accounts, 2)?,
                "amount": amount,
            }),
        )),
        TokenInstruction::BurnChecked { amount, decimals } => Some((
            "BurnChecked",
            json!({
                "account": account(accounts, 0)?,
                "mint": account(accounts, 1)?,
                "authority": account(accounts, 2)?,
                "amount": amount,
                "decimals": decimals,
            }),
        )),
        TokenInstruction::InitializeMint2 {
            decimals,
            mint_authority,
            freeze_authority,
        } => {
            let freeze_authority = match freeze_authority {
                COption::Some(k) => Some(key(k)),
                COption::None => None,
            };
            Some((
                "InitializeMint2",
                json!({
                    "mint": account(accounts, 0)?,
                    "decimals": decimals,
                    "mint_authority": key(mint_authority),
                    "freeze_authority": freeze_authority,
                }),
            ))
        }
        TokenInstruction::InitializeAccount3 { owner } => Some((
            "InitializeAccount3",
            json!({
                "account": account(accounts, 0)?,
                "mint": account(accounts, 1)?,
                "owner": key(owner),
            }),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: u8) -> Vec<Pubkey> {
        (1..=n).map(|i| Pubkey::new_from_array([i; 32])).collect()
    }

    fn amount_ix(opcode: u8, amount: u64) -> Vec<u8> {
        let mut data = vec![opcode];
        data.extend(amount.to_le_bytes());
        data
    }

    #[test]
    fn test_transfer() {
        let accounts = keys(3);
        let (name, payload) = decode_token_instruction(&amount_ix(3, 500), &accounts).unwrap();
        assert_eq!(name, "Transfer");
        assert_eq!(payload["amount"], 500);
        assert_eq!(payload["source"], accounts[0].to_string());
        assert_eq!(payload["destination"], accounts[1].to_string());
        assert_eq!(payload["authority"], accounts[2].to_string());
    }

    #[test]
    fn test_transfer_checked_account_order() {
        let accounts = keys(4);
        let mut data = amount_ix(12, 42);
        data.push(6);
        let (name, payload) = decode_token_instruction(&data, &accounts).unwrap();
        assert_eq!(name, "TransferChecked");
        assert_eq!(payload["mint"], accounts[1].to_string());
        assert_eq!(payload["destination"], accounts[2].to_string());
        assert_eq!(payload["decimals"], 6);
    }

    #[test]
    fn test_mint_and_burn() {
        let accounts = keys(3);
        let (name, _) = decode_token_instruction(&amount_ix(7, 1), &accounts).unwrap();
        assert_eq!(name, "MintTo");
        let (name, payload) = decode_token_instruction(&amount_ix(8, 9), &accounts).unwrap();
        assert_eq!(name, "Burn");
        assert_eq!(payload["account"], accounts[0].to_string());
    }

    #[test]
    fn test_initialize_account3() {
        let accounts = keys(2);
        let owner = Pubkey::new_from_array([0xEE; 32]);
        let mut data = vec![18];
        data.extend(owner.to_bytes());
        let (name, payload) = decode_token_instruction(&data, &accounts).unwrap();
        assert_eq!(name, "InitializeAccount3");
        assert_eq!(payload["owner"], owner.to_string());
    }

    #[test]
    fn test_initialize_mint2_without_freeze_authority() {
        let accounts = keys(1);
        let authority = Pubkey::new_from_array([0xAA; 32]);
        let mut data = vec![20, 9];
        data.extend(authority.to_bytes());
        data.push(0);
        let (name, payload) = decode_token_instruction(&data, &accounts).unwrap();
        assert_eq!(name, "InitializeMint2");
        assert_eq!(payload["decimals"], 9);
        assert_eq!(payload["mint_authority"], authority.to_string());
        assert!(payload["freeze_authority"].is_null());
    }

    #[test]
    fn test_not_allow_listed_is_skipped() {
        // Approve
        assert!(decode_token_instruction(&amount_ix(4, 1), &keys(3)).is_none());
        // CloseAccount
        assert!(decode_token_instruction(&[9], &keys(3)).is_none());
    }

    #[test]
    fn test_unknown_opcode_and_empty_data() {
        assert!(decode_token_instruction(&[250, 1, 2], &keys(3)).is_none());
        assert!(decode_token_instruction(&[], &keys(3)).is_none());
    }

    #[test]
    fn test_missing_accounts() {
        assert!(decode_token_instruction(&amount_ix(3, 1), &keys(2)).is_none());
    }
}
