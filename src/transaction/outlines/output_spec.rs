//! Output specifications and their evaluation into annotated outputs

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::paymail::{PaymailAddress, PaymailService};
use crate::primitives::script::data_script;
use crate::primitives::{PrimitiveError, TxOutput};
use crate::storage::PaymailsRepository;
use crate::transaction::annotations::{OutputAnnotation, PaymailAnnotation};

/// How the `data` entries of an OP_RETURN spec are interpreted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    #[default]
    Default,
    Strings,
    Hexes,
    Unsupported(String),
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "default" => DataType::Default,
            "strings" => DataType::Strings,
            "hexes" => DataType::Hexes,
            _ => DataType::Unsupported(value),
        }
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Default => "default".to_string(),
            DataType::Strings => "strings".to_string(),
            DataType::Hexes => "hexes".to_string(),
            DataType::Unsupported(other) => other,
        }
    }
}

/// One entry of an outline request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSpec {
    OpReturn {
        #[serde(default, rename = "dataType")]
        data_type: DataType,
        #[serde(default)]
        data: Vec<String>,
    },
    Paymail {
        to: String,
        #[serde(default)]
        satoshis: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
}

impl OutputSpec {
    pub fn op_return_strings<S: Into<String>>(data: impl IntoIterator<Item = S>) -> Self {
        OutputSpec::OpReturn {
            data_type: DataType::Strings,
            data: data.into_iter().map(Into::into).collect(),
        }
    }

    pub fn op_return_hexes<S: Into<String>>(data: impl IntoIterator<Item = S>) -> Self {
        OutputSpec::OpReturn {
            data_type: DataType::Hexes,
            data: data.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paymail(to: impl Into<String>, satoshis: u64, from: Option<String>) -> Self {
        OutputSpec::Paymail {
            to: to.into(),
            satoshis,
            from,
        }
    }
}

/// Transaction output with the annotation describing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedOutput {
    pub output: TxOutput,
    pub annotation: Option<OutputAnnotation>,
}

/// Collaborators available while evaluating specs for one user
pub struct EvaluationContext<'a> {
    pub ctx: &'a RequestContext,
    pub user_id: &'a str,
    pub paymail: &'a PaymailService,
    pub paymails: &'a dyn PaymailsRepository,
}

/// Evaluate every spec in order into one flat output list
pub async fn evaluate_outputs(
    ec: &EvaluationContext<'_>,
    specs: &[OutputSpec],
) -> WalletResult<Vec<AnnotatedOutput>> {
    if specs.is_empty() {
        return Err(WalletError::TxOutlineRequiresAtLeastOneOutput);
    }
    let mut outputs = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            OutputSpec::OpReturn { data_type, data } => {
                outputs.push(evaluate_op_return(data_type, data)?);
            }
            OutputSpec::Paymail { to, satoshis, from } => {
                outputs.extend(evaluate_paymail(ec, to, *satoshis, from.as_deref()).await?);
            }
        }
    }
    Ok(outputs)
}

fn evaluate_op_return(data_type: &DataType, data: &[String]) -> WalletResult<AnnotatedOutput> {
    if data.is_empty() {
        return Err(WalletError::OpReturnDataRequired);
    }
    let pushes: Vec<Vec<u8>> = match data_type {
        DataType::Default | DataType::Strings => data.iter().map(|s| s.as_bytes().to_vec()).collect(),
        DataType::Hexes => data
            .iter()
            .map(hex::decode)
            .collect::<Result<_, _>>()?,
        DataType::Unsupported(other) => {
            return Err(WalletError::OpReturnUnsupportedDataType(other.clone()))
        }
    };

    // A zero-length push encodes as OP_0, which is not a data push
    if pushes.iter().any(|push| push.is_empty()) {
        return Err(WalletError::OpReturnDataRequired);
    }

    let script = data_script(&pushes).map_err(|e| match e {
        PrimitiveError::PushDataTooLarge(size) => WalletError::OpReturnDataTooLarge { size },
        other => WalletError::Unexpected(other.to_string()),
    })?;

    Ok(AnnotatedOutput {
        output: TxOutput::new(0, script),
        annotation: Some(OutputAnnotation::data()),
    })
}

async fn evaluate_paymail(
    ec: &EvaluationContext<'_>,
    to: &str,
    satoshis: u64,
    from: Option<&str>,
) -> WalletResult<Vec<AnnotatedOutput>> {
    let receiver = PaymailAddress::parse(to).map_err(WalletError::ReceiverPaymailAddressIsInvalid)?;
    if satoshis == 0 {
        return Err(WalletError::OutputValueTooLow);
    }
    let sender = resolve_sender(ec, from).await?;

    let destination = ec.paymail.get_p2p_destinations(ec.ctx, &receiver, satoshis).await?;
    debug!(
        user_id = %ec.user_id,
        receiver = %receiver,
        outputs = destination.outputs.len(),
        "evaluated paymail output"
    );

    destination
        .outputs
        .iter()
        .map(|output| {
            let script = hex::decode(&output.script).map_err(|e| {
                WalletError::PaymailHostInvalidResponse(format!("invalid locking script: {e}"))
            })?;
            Ok(AnnotatedOutput {
                output: TxOutput::new(output.satoshis, script),
                annotation: Some(OutputAnnotation::paymail(PaymailAnnotation {
                    receiver: to.to_string(),
                    sender: sender.clone(),
                    reference: destination.reference.clone(),
                })),
            })
        })
        .collect()
}

async fn resolve_sender(ec: &EvaluationContext<'_>, from: Option<&str>) -> WalletResult<String> {
    let Some(from) = from else {
        ec.ctx.check("loading default paymail")?;
        return ec
            .paymails
            .get_default(ec.user_id)
            .await?
            .map(|paymail| paymail.address())
            .ok_or(WalletError::TxOutlineSenderPaymailAddressNoDefault);
    };

    let address = PaymailAddress::parse(from).map_err(WalletError::SenderPaymailAddressIsInvalid)?;
    ec.ctx.check("checking sender paymail")?;
    match ec.paymails.get(&address.alias, &address.domain).await? {
        Some(paymail) if paymail.user_id == ec.user_id => Ok(from.to_string()),
        Some(_) => Err(WalletError::SenderPaymailAddressIsInvalid(format!(
            "{from} does not belong to the user"
        ))),
        None => Err(WalletError::SenderPaymailAddressIsInvalid(format!(
            "{from} is not a known paymail"
        ))),
    }
}
