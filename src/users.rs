//! User registration, addresses and paymails

use std::sync::Arc;

use secp256k1::PublicKey;
use tracing::info;

use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::paymail::PaymailAddress;
use crate::primitives::script::address_from_public_key;
use crate::storage::{
    Address, Bucket, NewAddress, NewPaymail, OperationsRepository, Operation, Page, PageRequest,
    Paymail, User, UserWithPaymails, UsersRepository,
};

pub struct UsersService {
    users: Arc<dyn UsersRepository>,
    operations: Arc<dyn OperationsRepository>,
}

impl UsersService {
    pub fn new(users: Arc<dyn UsersRepository>, operations: Arc<dyn OperationsRepository>) -> Self {
        Self { users, operations }
    }

    /// Register a user by compressed public key
    ///
    /// The user ID is the P2PKH address of the key. That address is also
    /// tracked for the user, so outline change paid to it is credited back.
    pub async fn create(&self, ctx: &RequestContext, public_key_hex: &str) -> WalletResult<User> {
        let bytes = hex::decode(public_key_hex)?;
        let key = PublicKey::from_slice(&bytes)
            .map_err(|e| WalletError::InvalidPublicKey(e.to_string()))?;
        let public_key_hex = hex::encode(key.serialize());

        let user_id = address_from_public_key(&key.serialize());
        ctx.check("creating user")?;
        let user = self.users.create(&user_id, &public_key_hex).await?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn get_with_paymails(&self, ctx: &RequestContext, user_id: &str) -> WalletResult<Option<UserWithPaymails>> {
        ctx.check("loading user")?;
        self.users.get_with_paymails(user_id).await
    }

    pub async fn append_address(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        address: NewAddress,
    ) -> WalletResult<Address> {
        crate::primitives::script::public_key_hash_from_address(&address.address)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        ctx.check("appending address")?;
        self.users.append_address(user_id, address).await
    }

    /// Attach `alias@domain`; fails with `PaymailAlreadyExists` when taken
    pub async fn append_paymail(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        paymail: NewPaymail,
    ) -> WalletResult<Paymail> {
        let address = PaymailAddress::parse(&format!("{}@{}", paymail.alias, paymail.domain))
            .map_err(WalletError::SenderPaymailAddressIsInvalid)?;
        ctx.check("appending paymail")?;
        let paymail = self
            .users
            .append_paymail(
                user_id,
                NewPaymail {
                    alias: address.alias,
                    domain: address.domain,
                    ..paymail
                },
            )
            .await?;
        info!(user_id = %user_id, paymail = %paymail.address(), "paymail added");
        Ok(paymail)
    }

    pub async fn balance(&self, ctx: &RequestContext, user_id: &str) -> WalletResult<u64> {
        ctx.check("reading balance")?;
        self.users.balance(user_id, Bucket::Bsv).await
    }

    pub async fn operations(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        page: PageRequest,
    ) -> WalletResult<Page<Operation>> {
        ctx.check("listing operations")?;
        self.operations.page_for_user(user_id, page).await
    }
}

#[cfg(all(test, feature = "storage"))]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    const PUBLIC_KEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    async fn service() -> UsersService {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        UsersService::new(storage.clone(), storage)
    }

    #[tokio::test]
    async fn test_create_derives_id_and_is_idempotent() {
        let users = service().await;
        let ctx = RequestContext::new();
        let user = users.create(&ctx, PUBLIC_KEY).await.unwrap();
        assert_eq!(user.id, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");

        let again = users.create(&ctx, PUBLIC_KEY).await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_paymail_is_sanitized_and_unique() {
        let users = service().await;
        let ctx = RequestContext::new();
        let user = users.create(&ctx, PUBLIC_KEY).await.unwrap();
        let new = NewPaymail {
            alias: "Alice".to_string(),
            domain: "Example.com".to_string(),
            public_name: "Alice".to_string(),
            avatar: String::new(),
        };

        let paymail = users.append_paymail(&ctx, &user.id, new.clone()).await.unwrap();
        assert_eq!(paymail.address(), "alice@example.com");
        assert!(matches!(
            users.append_paymail(&ctx, &user.id, new).await,
            Err(WalletError::PaymailAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_key() {
        let users = service().await;
        let err = users.create(&RequestContext::new(), "02abcd").await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidPublicKey(_)));
        assert_eq!(err.to_response().status, 400);
    }
}
