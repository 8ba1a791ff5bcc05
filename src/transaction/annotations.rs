//! Per-input and per-output annotations travelling with outlines

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::{Bucket, CustomInstructions};

/// Paymail payment an output belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymailAnnotation {
    pub receiver: String,
    pub sender: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAnnotation {
    pub bucket: Bucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymail: Option<PaymailAnnotation>,
    /// Key derivation for outputs paying back to the user (change)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<CustomInstructions>,
}

impl OutputAnnotation {
    pub fn data() -> Self {
        Self {
            bucket: Bucket::Data,
            paymail: None,
            custom_instructions: None,
        }
    }

    pub fn paymail(annotation: PaymailAnnotation) -> Self {
        Self {
            bucket: Bucket::Bsv,
            paymail: Some(annotation),
            custom_instructions: None,
        }
    }

    /// Plain spendable output, e.g. change back to the user
    pub fn bsv() -> Self {
        Self {
            bucket: Bucket::Bsv,
            paymail: None,
            custom_instructions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAnnotation {
    pub custom_instructions: CustomInstructions,
}

/// Annotations keyed by input/output index; absent indices carry none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub outputs: BTreeMap<u32, OutputAnnotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<u32, InputAnnotation>,
}

impl Annotations {
    /// Reject output annotations pointing past the end of the transaction
    pub fn check_output_range(&self, output_count: usize) -> WalletResult<()> {
        match self.outputs.keys().find(|index| **index as usize >= output_count) {
            Some(index) => Err(WalletError::AnnotationIndexOutOfRange {
                index: *index,
                outputs: output_count,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let mut annotations = Annotations::default();
        annotations.outputs.insert(0, OutputAnnotation::data());
        annotations.outputs.insert(
            1,
            OutputAnnotation::paymail(PaymailAnnotation {
                receiver: "bob@example.com".to_string(),
                sender: "alice@example.com".to_string(),
                reference: "ref".to_string(),
            }),
        );

        let json = serde_json::to_value(&annotations).unwrap();
        assert_eq!(json["outputs"]["0"]["bucket"], "data");
        assert_eq!(json["outputs"]["1"]["paymail"]["receiver"], "bob@example.com");
        assert!(json.get("inputs").is_none());

        let back: Annotations = serde_json::from_value(json).unwrap();
        assert_eq!(back, annotations);
    }

    #[test]
    fn test_output_range() {
        let mut annotations = Annotations::default();
        annotations.outputs.insert(2, OutputAnnotation::data());
        assert!(annotations.check_output_range(3).is_ok());
        assert_eq!(
            annotations.check_output_range(2),
            Err(WalletError::AnnotationIndexOutOfRange { index: 2, outputs: 2 })
        );
    }
}
