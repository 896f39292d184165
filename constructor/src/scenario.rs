//! Scenario context and operation template hydration.
//!
//! A scenario template is a list of operations whose strings may contain
//! placeholders. [`populate_scenario`] substitutes the values decided by the
//! scenario generator and returns the intent submitted to the construction
//! pipeline.

use num_bigint::BigUint;
use serde_json::Value;

use crate::error::{ConstructorError, ConstructorResult};
use crate::types::{CoinIdentifier, Currency, Operation};

pub const SENDER: &str = "{{ SENDER }}";
pub const SENDER_VALUE: &str = "{{ SENDER_VALUE }}";
pub const RECIPIENT: &str = "{{ RECIPIENT }}";
pub const RECIPIENT_VALUE: &str = "{{ RECIPIENT_VALUE }}";
pub const COIN_IDENTIFIER: &str = "{{ COIN_IDENTIFIER }}";
pub const CHANGE_ADDRESS: &str = "{{ CHANGE_ADDRESS }}";
pub const CHANGE_VALUE: &str = "{{ CHANGE_VALUE }}";

/// Change output of a UTXO transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub address: String,
    pub value: BigUint,
}

/// Sized transfer decided by the scenario generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioContext {
    pub sender: String,
    /// Amount leaving the sender, substituted negated.
    pub sender_value: BigUint,
    pub recipient: String,
    pub recipient_value: BigUint,
    pub change: Option<Change>,
    pub currency: Currency,
    /// Coin consumed by the transfer (UTXO only).
    pub coin_identifier: Option<CoinIdentifier>,
}

impl ScenarioContext {
    pub fn change_address(&self) -> Option<&str> {
        self.change.as_ref().map(|c| c.address.as_str())
    }

    pub fn change_value(&self) -> Option<&BigUint> {
        self.change.as_ref().map(|c| &c.value)
    }

    fn negated_sender_value(&self) -> String {
        if self.sender_value == BigUint::default() {
            return "0".to_string();
        }
        format!("-{}", self.sender_value)
    }

    fn substitute(&self, input: &str) -> ConstructorResult<String> {
        let mut output = input
            .replace(SENDER_VALUE, &self.negated_sender_value())
            .replace(SENDER, &self.sender)
            .replace(RECIPIENT_VALUE, &self.recipient_value.to_string())
            .replace(RECIPIENT, &self.recipient);

        if output.contains(COIN_IDENTIFIER) {
            let coin = self.coin_identifier.as_ref().ok_or_else(|| {
                ConstructorError::Scenario(format!(
                    "{} used without a coin identifier",
                    COIN_IDENTIFIER
                ))
            })?;
            output = output.replace(COIN_IDENTIFIER, &coin.identifier);
        }

        if output.contains(CHANGE_ADDRESS) || output.contains(CHANGE_VALUE) {
            let change = self.change.as_ref().ok_or_else(|| {
                ConstructorError::Scenario("change placeholder used without change".to_string())
            })?;
            output = output
                .replace(CHANGE_VALUE, &change.value.to_string())
                .replace(CHANGE_ADDRESS, &change.address);
        }

        if let Some(placeholder) = find_placeholder(&output) {
            return Err(ConstructorError::Scenario(format!(
                "unknown placeholder {}",
                placeholder
            )));
        }

        Ok(output)
    }

    fn substitute_value(&self, value: &mut Value) -> ConstructorResult<()> {
        match value {
            Value::String(s) if s.contains("{{") => {
                *s = self.substitute(s)?;
            }
            Value::Array(items) => {
                for item in items {
                    self.substitute_value(item)?;
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    self.substitute_value(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// First `{{ NAME }}` token left in `s`, where NAME is made of uppercase
/// letters, digits and underscores. Other braces are literal text.
fn find_placeholder(s: &str) -> Option<&str> {
    s.match_indices("{{ ").find_map(|(start, open)| {
        let rest = &s[start + open.len()..];
        let name_len = rest.find(" }}")?;
        let name = &rest[..name_len];
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        valid.then(|| &s[start..start + open.len() + name_len + 3])
    })
}

/// Hydrate a cloned operation template with the values of `context`.
///
/// Every amount is forced to the scenario currency.
pub fn populate_scenario(
    context: &ScenarioContext,
    scenario: Vec<Operation>,
) -> ConstructorResult<Vec<Operation>> {
    let mut value = serde_json::to_value(scenario)
        .map_err(|e| ConstructorError::Scenario(format!("unable to encode template: {}", e)))?;

    context.substitute_value(&mut value)?;

    let mut operations: Vec<Operation> = serde_json::from_value(value)
        .map_err(|e| ConstructorError::Scenario(format!("unable to decode operations: {}", e)))?;

    for op in operations.iter_mut() {
        if let Some(amount) = op.amount.as_mut() {
            amount.currency = context.currency.clone();
        }
    }

    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountIdentifier, Amount, CoinAction, CoinChange, OperationIdentifier};

    fn currency() -> Currency {
        Currency::new("TOS", 8)
    }

    fn op(index: u64, kind: &str, address: &str, value: &str) -> Operation {
        Operation {
            operation_identifier: OperationIdentifier::new(index),
            related_operations: Vec::new(),
            kind: kind.to_string(),
            status: None,
            account: Some(AccountIdentifier::new(address)),
            amount: Some(Amount {
                value: value.to_string(),
                currency: Currency::new("PLACEHOLDER", 0),
            }),
            coin_change: None,
            metadata: None,
        }
    }

    fn context() -> ScenarioContext {
        ScenarioContext {
            sender: "alice".to_string(),
            sender_value: BigUint::from(1000u32),
            recipient: "bob".to_string(),
            recipient_value: BigUint::from(400u32),
            change: None,
            currency: currency(),
            coin_identifier: None,
        }
    }

    #[test]
    fn test_populate_transfer() {
        let template = vec![
            op(0, "Transfer", SENDER, SENDER_VALUE),
            op(1, "Transfer", RECIPIENT, RECIPIENT_VALUE),
        ];

        let ops = populate_scenario(&context(), template).unwrap();

        assert_eq!(ops[0].account.as_ref().unwrap().address, "alice");
        assert_eq!(ops[0].amount.as_ref().unwrap().value, "-1000");
        assert_eq!(ops[1].account.as_ref().unwrap().address, "bob");
        assert_eq!(ops[1].amount.as_ref().unwrap().value, "400");
        assert_eq!(ops[1].amount.as_ref().unwrap().currency, currency());
    }

    #[test]
    fn test_populate_does_not_touch_template() {
        let template = vec![op(0, "Transfer", SENDER, SENDER_VALUE)];
        let copy = template.clone();

        let _ = populate_scenario(&context(), copy).unwrap();

        assert_eq!(template[0].account.as_ref().unwrap().address, SENDER);
    }

    #[test]
    fn test_populate_coin_and_change() {
        let mut input = op(0, "Input", SENDER, SENDER_VALUE);
        input.coin_change = Some(CoinChange {
            coin_identifier: CoinIdentifier::new(COIN_IDENTIFIER),
            coin_action: CoinAction::CoinSpent,
        });
        let template = vec![
            input,
            op(1, "Output", RECIPIENT, RECIPIENT_VALUE),
            op(2, "Output", CHANGE_ADDRESS, CHANGE_VALUE),
        ];

        let mut ctx = context();
        ctx.coin_identifier = Some(CoinIdentifier::new("tx:0"));
        ctx.change = Some(Change {
            address: "carol".to_string(),
            value: BigUint::from(595u32),
        });

        let ops = populate_scenario(&ctx, template).unwrap();

        assert_eq!(
            ops[0].coin_change.as_ref().unwrap().coin_identifier.identifier,
            "tx:0"
        );
        assert_eq!(ops[2].account.as_ref().unwrap().address, "carol");
        assert_eq!(ops[2].amount.as_ref().unwrap().value, "595");
    }

    #[test]
    fn test_populate_missing_coin_identifier() {
        let mut input = op(0, "Input", SENDER, SENDER_VALUE);
        input.coin_change = Some(CoinChange {
            coin_identifier: CoinIdentifier::new(COIN_IDENTIFIER),
            coin_action: CoinAction::CoinSpent,
        });

        let err = populate_scenario(&context(), vec![input]).unwrap_err();
        assert!(matches!(err, ConstructorError::Scenario(_)));
    }

    #[test]
    fn test_populate_unknown_placeholder() {
        let template = vec![op(0, "Transfer", "{{ SOMEONE }}", SENDER_VALUE)];
        assert!(populate_scenario(&context(), template).is_err());
    }

    #[test]
    fn test_literal_braces_survive() {
        let mut transfer = op(0, "Transfer", SENDER, SENDER_VALUE);
        let mut metadata = serde_json::Map::new();
        metadata.insert("memo".to_string(), Value::from("{{raw}} and {{ lower }}"));
        metadata.insert("open".to_string(), Value::from("{{"));
        transfer.metadata = Some(metadata);

        let ops = populate_scenario(&context(), vec![transfer]).unwrap();

        let metadata = ops[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["memo"], "{{raw}} and {{ lower }}");
        assert_eq!(metadata["open"], "{{");
        assert_eq!(ops[0].account.as_ref().unwrap().address, "alice");
    }

    #[test]
    fn test_unknown_placeholder_named_in_error() {
        let mut transfer = op(0, "Transfer", SENDER, SENDER_VALUE);
        let mut metadata = serde_json::Map::new();
        metadata.insert("memo".to_string(), Value::from("{{ {{ FEE_PAYER }} }}"));
        transfer.metadata = Some(metadata);

        match populate_scenario(&context(), vec![transfer]) {
            Err(ConstructorError::Scenario(message)) => {
                assert!(message.ends_with("{{ FEE_PAYER }}"), "{}", message)
            }
            other => panic!("expected scenario error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_sender_value_not_negated() {
        let mut ctx = context();
        ctx.sender_value = BigUint::default();
        let ops = populate_scenario(&ctx, vec![op(0, "Transfer", SENDER, SENDER_VALUE)]).unwrap();
        assert_eq!(ops[0].amount.as_ref().unwrap().value, "0");
    }
}
