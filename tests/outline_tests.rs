//! Outline creation through the engine
//!
//! Covers data outputs, paymail destinations and funding from the user's
//! UTXOs against an in-memory database and mocked paymail peer.

#[cfg(feature = "storage")]
mod common;

#[cfg(feature = "storage")]
mod outline_tests {
    use std::sync::atomic::Ordering;

    use spv_wallet_core::primitives::{decode_beef_hex, Transaction};
    use spv_wallet_core::storage::{Bucket, UtxosRepository};
    use spv_wallet_core::transaction::record::extract_data;
    use spv_wallet_core::{OutlineFormat, OutputSpec, RequestContext, TransactionSpec, WalletError};

    use super::common::{
        locking_script, public_key, MockBroadcaster, MockPaymailClient, TestWallet, OUTSIDER_KEY, USER_KEY,
    };

    #[tokio::test]
    async fn test_op_return_strings_outline() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["Example data"])],
        );

        let outline = wallet.engine.create_raw_outline(&RequestContext::new(), Some(&spec)).await?;
        assert_eq!(outline.format, OutlineFormat::Raw);

        let tx = Transaction::from_hex(&outline.hex)?;
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].satoshis, 0);
        assert_eq!(
            hex::encode(&tx.outputs[0].locking_script),
            "006a0c4578616d706c652064617461"
        );
        assert_eq!(outline.annotations.outputs[&0].bucket, Bucket::Data);
        Ok(())
    }

    #[tokio::test]
    async fn test_op_return_payload_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![
                OutputSpec::op_return_strings(["Example", " ", "data"]),
                OutputSpec::op_return_hexes(["0102", "ff"]),
            ],
        );

        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let tx = decode_beef_hex(&outline.hex)?;
        assert_eq!(
            hex::encode(&tx.outputs[0].locking_script),
            "006a074578616d706c6501200464617461"
        );
        assert_eq!(extract_data(&tx.outputs[0].locking_script)?, b"Example data".to_vec());
        assert_eq!(extract_data(&tx.outputs[1].locking_script)?, vec![0x01, 0x02, 0xff]);
        Ok(())
    }

    #[tokio::test]
    async fn test_paymail_outline_to_external_recipient() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 1000, Some("sender@wallet.test".to_string()))],
        );

        let outline = wallet.engine.create_raw_outline(&RequestContext::new(), Some(&spec)).await?;
        let tx = Transaction::from_hex(&outline.hex)?;
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].satoshis, 1000);
        assert_eq!(tx.outputs[0].locking_script, locking_script(OUTSIDER_KEY));

        let annotation = &outline.annotations.outputs[&0];
        assert_eq!(annotation.bucket, Bucket::Bsv);
        let paymail = annotation.paymail.as_ref().ok_or("missing paymail annotation")?;
        assert_eq!(paymail.receiver, "recipient@external.test");
        assert_eq!(paymail.sender, "sender@wallet.test");
        assert_eq!(paymail.reference, "z0bac4ec-6f15-42de-9ef4-e60bfdabf4f7");
        assert_eq!(wallet.paymail_client.destination_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_paymail_sender_defaults_to_oldest_paymail() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 10, None)],
        );

        let outline = wallet.engine.create_raw_outline(&RequestContext::new(), Some(&spec)).await?;
        let paymail = outline.annotations.outputs[&0]
            .paymail
            .as_ref()
            .ok_or("missing paymail annotation")?;
        assert_eq!(paymail.sender, "sender@wallet.test");
        Ok(())
    }

    #[tokio::test]
    async fn test_foreign_sender_paymail_rejected() {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 10, Some("someone@elsewhere.test".to_string()))],
        );

        let result = wallet.engine.create_raw_outline(&RequestContext::new(), Some(&spec)).await;
        assert!(matches!(result, Err(WalletError::SenderPaymailAddressIsInvalid(_))));
    }

    #[tokio::test]
    async fn test_sender_without_paymail_has_no_default() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let ctx = RequestContext::new();
        let other = wallet
            .engine
            .users()
            .create(&ctx, &hex::encode(public_key(OUTSIDER_KEY)))
            .await?;
        let spec = TransactionSpec::new(
            other.id,
            vec![OutputSpec::paymail("recipient@external.test", 10, None)],
        );

        let result = wallet.engine.create_raw_outline(&ctx, Some(&spec)).await;
        assert_eq!(result, Err(WalletError::TxOutlineSenderPaymailAddressNoDefault));
        assert_eq!(wallet.paymail_client.destination_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_paymail_output_needs_value_and_valid_receiver() {
        let wallet = TestWallet::new().await;
        let ctx = RequestContext::new();

        let zero = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 0, None)],
        );
        assert_eq!(
            wallet.engine.create_raw_outline(&ctx, Some(&zero)).await,
            Err(WalletError::OutputValueTooLow)
        );

        for receiver in ["recipient-at-external.test", "@external.test", "recipient@"] {
            let spec = TransactionSpec::new(
                wallet.user.id.clone(),
                vec![OutputSpec::paymail(receiver, 10, None)],
            );
            assert!(matches!(
                wallet.engine.create_raw_outline(&ctx, Some(&spec)).await,
                Err(WalletError::ReceiverPaymailAddressIsInvalid(_))
            ));
        }
        assert_eq!(wallet.paymail_client.destination_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_receiver_host_without_p2p() {
        let wallet = TestWallet::with_mocks(MockPaymailClient::without_p2p(), MockBroadcaster::seen()).await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 10, None)],
        );

        let result = wallet.engine.create_raw_outline(&RequestContext::new(), Some(&spec)).await;
        assert_eq!(
            result,
            Err(WalletError::PaymailHostNotSupportingP2P("external.test".to_string()))
        );
        assert_eq!(wallet.paymail_client.destination_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_op_return_element_rejected() {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["a", "", "b"])],
        );
        assert_eq!(
            wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await,
            Err(WalletError::OpReturnDataRequired)
        );
    }

    #[tokio::test]
    async fn test_missing_spec_and_user() {
        let wallet = TestWallet::new().await;
        let ctx = RequestContext::new();
        assert_eq!(
            wallet.engine.create_outline(&ctx, None).await,
            Err(WalletError::TxOutlineSpecificationRequired)
        );

        let spec = TransactionSpec::new("", vec![OutputSpec::op_return_strings(["x"])]);
        assert_eq!(
            wallet.engine.create_outline(&ctx, Some(&spec)).await,
            Err(WalletError::TxOutlineSpecificationUserIdRequired)
        );
    }

    #[tokio::test]
    async fn test_funded_outline_selects_coin_and_returns_change() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let deposit_id = wallet.fund(1000).await;

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["hello"])],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let tx = decode_beef_hex(&outline.hex)?;

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].source_txid.to_hex(), deposit_id);
        assert!(tx.inputs[0].source_transaction.is_some());
        assert!(outline.annotations.inputs.contains_key(&0));

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].locking_script, locking_script(USER_KEY));
        assert_eq!(outline.annotations.outputs[&1].bucket, Bucket::Bsv);
        let fee = 1000 - tx.outputs[1].satoshis;
        assert!(fee >= 1 && fee < 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_funded_outline_without_coins() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 500, None)],
        )
        .funded();

        let result = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await;
        assert_eq!(result, Err(WalletError::TxOutlineInsufficientFunds));
        assert!(wallet.storage.list_utxos(&wallet.user.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_request_stops_before_paymail() {
        let wallet = TestWallet::new().await;
        let (ctx, handle) = RequestContext::create_pair();
        handle.cancel();
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 10, Some("sender@wallet.test".to_string()))],
        );

        let result = wallet.engine.create_outline(&ctx, Some(&spec)).await;
        assert!(matches!(result, Err(WalletError::RequestCancelled(_))));
        assert_eq!(wallet.paymail_client.destination_calls.load(Ordering::SeqCst), 0);
    }
}
