//! Account operations

use std::sync::Arc;

use tracing::{info, warn};

use super::{Engine, WorkflowError};
use crate::registry::naming::random_string;
use crate::registry::{Account, AccountRole};

/// Name of the bootstrap administrator account
pub const ADMIN_ACCOUNT: &str = "admin";

const ONE_TIME_PASSWORD_LEN: usize = 10;

impl Engine {
    /// Fetch an account, creating it as a guest on first use
    pub fn ensure_account(&self, name: &str) -> Arc<Account> {
        let account = self.registry.ensure_account(name);
        self.saver.notify();
        account
    }

    pub fn create_account(&self, name: &str, role: AccountRole) -> Result<Arc<Account>, WorkflowError> {
        if name.trim().is_empty() {
            return Err(WorkflowError::Validation("account name is required".to_string()));
        }
        let account = self.registry.create_account(name, role)?;
        info!(account = %name, %role, "Account created");
        self.saver.notify();
        Ok(account)
    }

    pub async fn set_account_role(&self, name: &str, role: AccountRole) -> Result<(), WorkflowError> {
        let account = self.account_or_not_found(name)?;
        account.set_role(role).await;
        self.saver.notify();
        Ok(())
    }

    pub async fn set_account_contact(
        &self,
        name: &str,
        contact: Option<String>,
    ) -> Result<(), WorkflowError> {
        let account = self.account_or_not_found(name)?;
        account.set_contact(contact).await;
        self.saver.notify();
        Ok(())
    }

    /// Remove an account; refused while it still owns anything
    pub async fn delete_account(&self, name: &str) -> Result<(), WorkflowError> {
        self.registry.delete_account(name).await?;
        info!(account = %name, "Account deleted");
        self.saver.notify();
        Ok(())
    }

    /// Make sure the admin account exists with the admin role and give it a
    /// fresh one-time password, which is returned
    pub async fn initialize_admin(&self) -> String {
        let admin = self.registry.ensure_account(ADMIN_ACCOUNT);
        admin.set_role(AccountRole::Admin).await;

        let password = random_string(ONE_TIME_PASSWORD_LEN);
        admin.set_one_time_password(Some(password.clone())).await;
        warn!(account = ADMIN_ACCOUNT, otp = %password, "Admin one-time password issued");
        self.saver.notify();
        password
    }

    fn account_or_not_found(&self, name: &str) -> Result<Arc<Account>, WorkflowError> {
        self.registry
            .account(name)
            .ok_or_else(|| WorkflowError::NotFound(format!("account '{}'", name)))
    }
}
