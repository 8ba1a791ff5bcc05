//! The single paymail payment a recorded transaction may carry

use std::collections::BTreeSet;

use crate::errors::{WalletError, WalletResult};
use crate::storage::Bucket;
use crate::transaction::annotations::{Annotations, PaymailAnnotation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymailInfo {
    annotation: Option<PaymailAnnotation>,
    vouts: BTreeSet<u32>,
    /// Set when there is nobody external to notify
    pub skip_notification: bool,
}

impl PaymailInfo {
    /// Collect the paymail annotations of `bsv` outputs
    pub fn from_annotations(annotations: &Annotations) -> WalletResult<Self> {
        let mut info = Self::default();
        for (vout, annotation) in &annotations.outputs {
            if annotation.bucket != Bucket::Bsv {
                continue;
            }
            let Some(paymail) = &annotation.paymail else {
                continue;
            };
            match &info.annotation {
                Some(existing) if existing != paymail => {
                    return Err(WalletError::MultiPaymailRecipientsNotSupported)
                }
                Some(_) => {}
                None => info.annotation = Some(paymail.clone()),
            }
            info.vouts.insert(*vout);
        }
        info.skip_notification = info.annotation.is_none();
        Ok(info)
    }

    pub fn is_empty(&self) -> bool {
        self.annotation.is_none()
    }

    pub fn has_vout(&self, vout: u32) -> bool {
        self.vouts.contains(&vout)
    }

    pub fn sender(&self) -> &str {
        self.annotation.as_ref().map_or("", |a| a.sender.as_str())
    }

    pub fn receiver(&self) -> &str {
        self.annotation.as_ref().map_or("", |a| a.receiver.as_str())
    }

    pub fn reference(&self) -> &str {
        self.annotation.as_ref().map_or("", |a| a.reference.as_str())
    }
}
