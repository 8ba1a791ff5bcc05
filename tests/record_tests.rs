//! Recording signed transactions through the engine
//!
//! Deposits are recorded first to give the user a tracked coin, then spent
//! either directly or through a funded outline.

#[cfg(feature = "storage")]
mod common;

#[cfg(feature = "storage")]
mod record_tests {
    use spv_wallet_core::broadcaster::BroadcastError;
    use spv_wallet_core::primitives::{decode_beef_hex, encode_beef_hex, Outpoint, TxOutput};
    use spv_wallet_core::storage::{
        Bucket, OperationType, PageRequest, TrackedOutputsRepository, TransactionsRepository,
        TxStatus, UsersRepository, UtxosRepository,
    };
    use spv_wallet_core::transaction::record::P2PKH_ESTIMATED_INPUT_SIZE;
    use spv_wallet_core::{OutputSpec, RequestContext, TransactionSpec, WalletError};

    use tempfile::TempDir;

    use super::common::{
        deposit, locking_script, mined_coin, public_key, sign_outline, spend, MockBroadcaster,
        MockPaymailClient, TestWallet, FUNDER_KEY, OUTSIDER_KEY, USER_KEY,
    };

    #[tokio::test]
    async fn test_deposit_credits_tracked_address() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let tx = deposit(1000);

        let recorded = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, false)
            .await?;
        assert_eq!(recorded.tx_id, tx.txid().to_hex());
        assert_eq!(recorded.status, TxStatus::Broadcasted);
        assert_eq!(recorded.operations.len(), 1);
        assert_eq!(recorded.operations[0].op_type, OperationType::Incoming);
        assert_eq!(recorded.operations[0].value, 1000);

        let utxos = wallet.storage.list_utxos(&wallet.user.id).await?;
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].satoshis, 1000);
        assert_eq!(utxos[0].unlocking_script_estimated_size, P2PKH_ESTIMATED_INPUT_SIZE);

        // Parent is not tracked, so the full BEEF is kept
        let stored = TransactionsRepository::get(wallet.storage.as_ref(), &recorded.tx_id)
            .await?
            .ok_or("transaction not stored")?;
        assert!(stored.beef_hex.is_some());
        assert!(stored.raw_hex.is_none());
        assert_eq!(wallet.broadcaster.submitted(), vec![recorded.tx_id.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_spend_of_tracked_output() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let parent = deposit(1000);
        wallet.fund(1000).await;

        let tx = spend(
            parent.clone(),
            USER_KEY,
            vec![TxOutput::new(999, locking_script(OUTSIDER_KEY))],
        );
        let recorded = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, true)
            .await?;

        let outpoint = Outpoint::new(parent.txid().to_hex(), 0);
        let found = wallet.storage.find_by_outpoints(&[outpoint.clone()]).await?;
        assert_eq!(found.tracked.len(), 1);
        assert_eq!(found.tracked[0].spending_tx_id.as_deref(), Some(recorded.tx_id.as_str()));
        assert!(found.utxos.is_empty());
        assert!(wallet.storage.get_utxo(&wallet.user.id, &outpoint).await?.is_none());

        let operations = wallet
            .engine
            .users()
            .operations(&RequestContext::new(), &wallet.user.id, PageRequest::default())
            .await?;
        let spent = operations
            .items
            .iter()
            .find(|op| op.tx_id == recorded.tx_id)
            .ok_or("operation not stored")?;
        assert_eq!(spent.value, -1000);
        assert_eq!(spent.op_type, OperationType::Outgoing);

        let stored = TransactionsRepository::get(wallet.storage.as_ref(), &recorded.tx_id)
            .await?
            .ok_or("transaction not stored")?;
        assert_eq!(stored.status, TxStatus::Broadcasted);
        // The parent is tracked now, so the raw form suffices
        assert!(stored.raw_hex.is_some());
        assert_eq!(wallet.storage.balance(&wallet.user.id, Bucket::Bsv).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_internal_spend_costs_only_the_fee() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        wallet.fund(1000).await;

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["note to self"])],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let signed = sign_outline(&outline);
        let tx = decode_beef_hex(&signed.hex)?;
        let fee = 1000 - tx.total_output_satoshis().unwrap();

        let recorded = wallet
            .engine
            .record_outline(&RequestContext::new(), &wallet.user.id, &signed)
            .await?;
        let total: i64 = recorded.operations.iter().map(|op| op.value).sum();
        assert_eq!(total, -(fee as i64));
        assert_eq!(
            wallet.storage.balance(&wallet.user.id, Bucket::Bsv).await?,
            1000 - fee
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unsigned_outline_fails_verification() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        wallet.fund(1000).await;

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["unsigned"])],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let result = wallet
            .engine
            .record_outline(&RequestContext::new(), &wallet.user.id, &outline)
            .await;
        assert!(matches!(result, Err(WalletError::TxValidation(_))));
        assert_eq!(wallet.broadcaster.submitted().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_spending_user_coin_forces_verification() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let parent = deposit(1000);
        wallet.fund(1000).await;

        // Signed by the wrong key
        let tx = spend(parent, FUNDER_KEY, vec![TxOutput::new(999, locking_script(OUTSIDER_KEY))]);
        let result = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, false)
            .await;
        assert!(matches!(result, Err(WalletError::TxValidation(_))));
        assert_eq!(wallet.storage.balance(&wallet.user.id, Bucket::Bsv).await?, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_double_spend() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let parent = deposit(1000);
        wallet.fund(1000).await;

        let first = spend(parent.clone(), USER_KEY, vec![TxOutput::new(999, locking_script(OUTSIDER_KEY))]);
        let second = spend(parent, USER_KEY, vec![TxOutput::new(998, locking_script(OUTSIDER_KEY))]);
        let first_hex = encode_beef_hex(&first)?;
        let second_hex = encode_beef_hex(&second)?;

        let ctx = RequestContext::new();
        let (a, b) = tokio::join!(
            wallet.engine.record(&ctx, &wallet.user.id, &first_hex, true),
            wallet.engine.record(&ctx, &wallet.user.id, &second_hex, true),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(WalletError::UtxoSpent))).count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rerecording_same_transaction_is_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let parent = deposit(1000);
        wallet.fund(1000).await;

        let tx = spend(parent, USER_KEY, vec![TxOutput::new(999, locking_script(OUTSIDER_KEY))]);
        let hex = encode_beef_hex(&tx)?;
        let ctx = RequestContext::new();
        let first = wallet.engine.record(&ctx, &wallet.user.id, &hex, true).await?;
        let second = wallet.engine.record(&ctx, &wallet.user.id, &hex, true).await?;
        assert_eq!(first.tx_id, second.tx_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_failure_leaves_no_trace() -> Result<(), Box<dyn std::error::Error>> {
        let wallet =
            TestWallet::with_broadcaster(MockBroadcaster::rejecting(BroadcastError::FeeTooLow(465))).await;
        let tx = deposit(1000);

        let result = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, false)
            .await;
        assert!(matches!(result, Err(WalletError::TxBroadcast(_))));

        assert!(TransactionsRepository::get(wallet.storage.as_ref(), &tx.txid().to_hex())
            .await?
            .is_none());
        assert!(wallet.storage.list_utxos(&wallet.user.id).await?.is_empty());
        let operations = wallet
            .engine
            .users()
            .operations(&RequestContext::new(), &wallet.user.id, PageRequest::default())
            .await?;
        assert_eq!(operations.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_failure_after_broadcast_leaves_no_trace() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("wallet.db");
        let wallet = TestWallet::on_disk(&path).await;
        let ctx = RequestContext::new();
        let deposit_id = wallet.fund(1000).await;

        // Operation rows are written last, so the abort lands mid-write
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TRIGGER reject_operations BEFORE INSERT ON operations
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )?;
        drop(conn);

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 600, None)],
        )
        .funded();
        let outline = wallet.engine.create_outline(&ctx, Some(&spec)).await?;
        let signed = sign_outline(&outline);
        let tx_id = decode_beef_hex(&signed.hex)?.txid().to_hex();

        let result = wallet.engine.record_outline(&ctx, &wallet.user.id, &signed).await;
        assert!(matches!(result, Err(WalletError::SavingData(_))));
        assert_eq!(wallet.broadcaster.submitted(), vec![deposit_id.clone(), tx_id.clone()]);
        assert!(wallet.paymail_client.submitted().is_empty());

        assert!(TransactionsRepository::get(wallet.storage.as_ref(), &tx_id)
            .await?
            .is_none());
        let found = wallet
            .storage
            .find_by_outpoints(&[Outpoint::new(deposit_id.clone(), 0)])
            .await?;
        assert_eq!(found.tracked.len(), 1);
        assert!(found.tracked[0].spending_tx_id.is_none());
        assert_eq!(found.utxos.len(), 1);
        assert_eq!(wallet.storage.balance(&wallet.user.id, Bucket::Bsv).await?, 1000);
        let operations = wallet
            .engine
            .users()
            .operations(&ctx, &wallet.user.id, PageRequest::default())
            .await?;
        assert_eq!(operations.total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_mined_on_broadcast() -> Result<(), Box<dyn std::error::Error>> {
        let tx = deposit(500);
        let proof = mined_coin(USER_KEY, 1)
            .merkle_path
            .ok_or("missing proof")?
            .to_json()?;
        let wallet = TestWallet::with_broadcaster(MockBroadcaster::mined(proof.clone())).await;

        let recorded = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, false)
            .await?;
        assert_eq!(recorded.status, TxStatus::Mined);

        let stored = TransactionsRepository::get(wallet.storage.as_ref(), &recorded.tx_id)
            .await?
            .ok_or("transaction not stored")?;
        assert_eq!(stored.status, TxStatus::Mined);
        assert_eq!(stored.merkle_path.as_deref(), Some(proof.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_unrelated_transaction_has_no_operations() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let tx = spend(
            mined_coin(FUNDER_KEY, 10),
            FUNDER_KEY,
            vec![TxOutput::new(9, locking_script(OUTSIDER_KEY))],
        );
        let result = wallet
            .engine
            .record(&RequestContext::new(), &wallet.user.id, &encode_beef_hex(&tx)?, false)
            .await;
        assert_eq!(result, Err(WalletError::NoOperations));
        assert!(wallet.broadcaster.submitted().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_external_paymail_is_notified() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        wallet.fund(5000).await;

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("recipient@external.test", 1000, None)],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let recorded = wallet
            .engine
            .record_outline(&RequestContext::new(), &wallet.user.id, &sign_outline(&outline))
            .await?;

        let submitted = wallet.paymail_client.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].beef.is_some());
        assert_eq!(submitted[0].reference, "z0bac4ec-6f15-42de-9ef4-e60bfdabf4f7");
        assert_eq!(submitted[0].metadata.sender, "sender@wallet.test");

        let outgoing = recorded
            .operations
            .iter()
            .find(|op| op.user_id == wallet.user.id)
            .ok_or("missing operation")?;
        assert_eq!(outgoing.op_type, OperationType::Outgoing);
        assert_eq!(outgoing.counterparty, "recipient@external.test");
        Ok(())
    }

    #[tokio::test]
    async fn test_internal_paymail_receiver_is_not_notified() -> Result<(), Box<dyn std::error::Error>> {
        // The peer hands out an address the wallet itself tracks
        let wallet = TestWallet::with_mocks(
            MockPaymailClient::paying_to(&locking_script(USER_KEY)),
            MockBroadcaster::seen(),
        )
        .await;
        wallet.fund(5000).await;

        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::paymail("sender@wallet.test", 1000, None)],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        wallet
            .engine
            .record_outline(&RequestContext::new(), &wallet.user.id, &sign_outline(&outline))
            .await?;

        assert!(wallet.paymail_client.submitted().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_annotation_out_of_range_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        wallet.fund(1000).await;
        let spec = TransactionSpec::new(
            wallet.user.id.clone(),
            vec![OutputSpec::op_return_strings(["x"])],
        )
        .funded();
        let outline = wallet.engine.create_outline(&RequestContext::new(), Some(&spec)).await?;
        let mut signed = sign_outline(&outline);
        let annotation = signed.annotations.outputs[&0].clone();
        signed.annotations.outputs.insert(7, annotation);

        let result = wallet
            .engine
            .record_outline(&RequestContext::new(), &wallet.user.id, &signed)
            .await;
        assert!(matches!(
            result,
            Err(WalletError::AnnotationIndexOutOfRange { index: 7, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_user_receives_internal_transfer() -> Result<(), Box<dyn std::error::Error>> {
        let wallet = TestWallet::new().await;
        let parent = deposit(1000);
        wallet.fund(1000).await;

        let ctx = RequestContext::new();
        let other = wallet
            .engine
            .users()
            .create(&ctx, &hex::encode(public_key(OUTSIDER_KEY)))
            .await?;

        let tx = spend(parent, USER_KEY, vec![TxOutput::new(990, locking_script(OUTSIDER_KEY))]);
        let recorded = wallet
            .engine
            .record(&ctx, &wallet.user.id, &encode_beef_hex(&tx)?, true)
            .await?;
        let total: i64 = recorded.operations.iter().map(|op| op.value).sum();
        assert_eq!(total, -10);
        assert_eq!(wallet.storage.balance(&other.id, Bucket::Bsv).await?, 990);
        assert_eq!(
            UsersRepository::balance(wallet.storage.as_ref(), &wallet.user.id, Bucket::Bsv).await?,
            0
        );
        Ok(())
    }
}
