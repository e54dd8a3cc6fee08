use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::{AppState, Notice, NoticeLevel, Route, WalletStatus};
use crate::nominee::NomineeRecord;
use crate::storage::{LocalWalletRecord, UserPreferences};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeView {
    pub level: String,
    pub message: String,
}

impl From<&Notice> for NoticeView {
    fn from(notice: &Notice) -> Self {
        let level = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        };
        Self {
            level: level.to_string(),
            message: notice.message.clone(),
        }
    }
}

/// Snapshot of the dashboard for machine-readable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub route: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub wallet: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub balance: Option<String>,
    pub nominees: Vec<NomineeView>,
    #[serde(default)]
    pub pending_nominee: Option<String>,
    #[serde(default)]
    pub on_chain_share: Option<u32>,
    #[serde(default)]
    pub last_transaction: Option<String>,
    pub notices: Vec<NoticeView>,
}

impl From<&AppState> for DashboardResponse {
    fn from(state: &AppState) -> Self {
        let route = match state.route {
            Route::Loading => "loading",
            Route::Login => "login",
            Route::Dashboard => "dashboard",
        };
        let wallet = match state.wallet {
            WalletStatus::Unknown => "unknown",
            WalletStatus::Missing => "missing",
            WalletStatus::Locked => "locked",
            WalletStatus::Unlocked => "unlocked",
        };
        Self {
            route: route.to_string(),
            user_id: state.user_id().map(str::to_string),
            display_name: state.user().map(|user| user.display_name().to_string()),
            wallet: wallet.to_string(),
            address: state.address.map(|address| address.to_string()),
            balance: state.balance.clone(),
            nominees: state.nominees.iter().map(NomineeView::from).collect(),
            pending_nominee: state.pending_nominee.clone(),
            on_chain_share: state.on_chain_share,
            last_transaction: state.last_transaction.map(|hash| hash.to_string()),
            notices: state.notices.iter().map(NoticeView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NomineeView {
    pub email: String,
    pub address: String,
    pub share_percent: u32,
}

impl From<&NomineeRecord> for NomineeView {
    fn from(record: &NomineeRecord) -> Self {
        Self {
            email: record.email.clone(),
            address: record.address.clone(),
            share_percent: record.share,
        }
    }
}

/// A device-local wallet without its key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWalletSummary {
    pub id: String,
    pub name: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl From<&LocalWalletRecord> for LocalWalletSummary {
    fn from(record: &LocalWalletRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            address: record.address.to_string(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWalletsResponse {
    pub wallets: Vec<LocalWalletSummary>,
    pub preferences: UserPreferences,
    #[serde(default)]
    pub password_hint: Option<String>,
}
