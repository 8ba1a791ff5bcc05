//! Transaction engine: outlines, source graphs and recording

pub mod annotations;
pub mod outlines;
pub mod record;
pub mod source_tx;

pub use annotations::{Annotations, InputAnnotation, OutputAnnotation, PaymailAnnotation};
pub use outlines::{Outline, OutlineFormat, OutlinesService, OutputSpec, TransactionSpec};
pub use record::{RecordService, RecordedTransaction};
pub use source_tx::{BeefService, SourceTransactionBuilder, SourceTxMap};
