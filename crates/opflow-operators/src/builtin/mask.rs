use futures::future::BoxFuture;
use regex::{Captures, Regex};
use tracing::debug;

use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::Operator;
use opflow_core::types::WorkflowState;

/// Masks contact details and identity numbers in upstream results.
pub struct MaskOperator {
    email: Regex,
    landline: Regex,
    digits: Regex,
}

impl MaskOperator {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| OpflowError::Config(format!("mask pattern: {}", e)))
        };
        Ok(Self {
            email: compile(r"([A-Za-z0-9._%+-])[A-Za-z0-9._%+-]*@([A-Za-z0-9.-]+\.[A-Za-z]{2,})")?,
            landline: compile(r"([0-9]{3,4})-([0-9]{7,8})")?,
            // Whole digit runs; the length decides what they are.
            digits: compile(r"[0-9]{11,}[Xx]?")?,
        })
    }

    /// Mask one string; returns the masked text and the number of hits.
    pub fn mask_text(&self, text: &str) -> (String, usize) {
        let mut hits = 0;

        let out = self.email.replace_all(text, |c: &Captures| {
            hits += 1;
            format!("{}***@{}", &c[1], &c[2])
        });
        let out = self.landline.replace_all(&out, |c: &Captures| {
            hits += 1;
            let number = &c[2];
            format!("{}-{}{}", &c[1], "*".repeat(number.len() - 4), &number[number.len() - 4..])
        });
        let out = self.digits.replace_all(&out, |c: &Captures| {
            let run = &c[0];
            match mask_digit_run(run) {
                Some(masked) => {
                    hits += 1;
                    masked
                }
                None => run.to_string(),
            }
        });

        (out.into_owned(), hits)
    }

    fn mask_value(&self, value: &mut serde_json::Value) -> usize {
        match value {
            serde_json::Value::String(s) => {
                let (masked, hits) = self.mask_text(s);
                *s = masked;
                hits
            }
            serde_json::Value::Array(items) => items.iter_mut().map(|v| self.mask_value(v)).sum(),
            serde_json::Value::Object(map) => map.values_mut().map(|v| self.mask_value(v)).sum(),
            _ => 0,
        }
    }
}

/// Mobile numbers keep 3+4 digits, identity numbers keep 6+4.
fn mask_digit_run(run: &str) -> Option<String> {
    let len = run.len();
    let is_mobile = len == 11 && run.starts_with('1');
    let is_identity = len == 15 || len == 18;
    if is_mobile {
        Some(format!("{}****{}", &run[..3], &run[7..]))
    } else if is_identity {
        Some(format!("{}{}{}", &run[..6], "*".repeat(len - 10), &run[len - 4..]))
    } else {
        None
    }
}

impl Operator for MaskOperator {
    fn name(&self) -> &str {
        "mask"
    }
    fn description(&self) -> &str {
        "Mask sensitive data (e-mail, phone and identity numbers) in upstream results"
    }
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move {
            let mut state = state;
            let node_id = state.current_node()?.clone();
            let mut payload = state.upstream_payload()?;
            let hits = self.mask_value(&mut payload);
            debug!(node_id = %node_id, hits, "Masked upstream payload");
            state.set_result(payload)?;
            Ok(state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::types::{NodeCursor, NodeId};
    use serde_json::json;

    #[test]
    fn test_mask_email() {
        let op = MaskOperator::new().unwrap();
        let (out, hits) = op.mask_text("contact alice.w@example.com today");
        assert_eq!(out, "contact a***@example.com today");
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_mask_mobile_and_identity() {
        let op = MaskOperator::new().unwrap();
        let (out, hits) = op.mask_text("电话13812345678，身份证11010119900307123X");
        assert_eq!(out, "电话138****5678，身份证110101********123X");
        assert_eq!(hits, 2);
    }

    #[test]
    fn test_mask_landline() {
        let op = MaskOperator::new().unwrap();
        let (out, _) = op.mask_text("call 010-12345678");
        assert_eq!(out, "call 010-****5678");
    }

    #[test]
    fn test_other_numbers_untouched() {
        let op = MaskOperator::new().unwrap();
        let (out, hits) = op.mask_text("order 123456789012 shipped; 42 items");
        assert_eq!(out, "order 123456789012 shipped; 42 items");
        assert_eq!(hits, 0);
    }

    #[tokio::test]
    async fn test_masks_nested_upstream() {
        let op = MaskOperator::new().unwrap();
        let mut state = WorkflowState::new("q");
        state.insert_result(
            NodeId::ordinal(0),
            json!({"rows": [["bob@corp.io", 7], ["13900001111", null]]}),
        );
        state.attach(NodeCursor {
            node_id: NodeId::ordinal(1),
            predecessors: vec![NodeId::ordinal(0)],
        });

        let state = op.execute(state).await.unwrap();
        assert_eq!(
            state.result("n1"),
            Some(&json!({"rows": [["b***@corp.io", 7], ["139****1111", null]]}))
        );
        assert_eq!(
            state.result("n0"),
            Some(&json!({"rows": [["bob@corp.io", 7], ["13900001111", null]]}))
        );
    }
}
