// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

pub mod authorization;
pub mod cancel;
pub mod clock;
pub mod context;
pub mod decrypt;
mod error;
pub mod flow;
pub mod handles;
pub mod input;
pub mod oracle;
pub mod signer;
pub mod store;
pub mod submission;
mod types;

pub use authorization::{Authorization, AuthorizationCache, AuthorizationSettings, CacheKey};
pub use cancel::{cancel_channel, CancelSignal};
pub use clock::{Clock, SystemClock};
pub use context::{ContextSource, ContextTracker, ExecutionContext};
pub use decrypt::{DecryptOutcome, DecryptState, DecryptionOrchestrator, DEFAULT_DECRYPT_DEADLINE};
pub use error::*;
pub use flow::{
    format_rate, LoanApplication, LoanRiskFlow, LoanRiskReport, RiskAssessment, RiskGrade,
    TargetProfile,
};
pub use handles::{FetchedHandles, HandleFetcher};
pub use input::{BfvBackend, EncryptedBatch, EncryptedInput, EncryptionBackend, InputBuilder};
pub use oracle::{DecryptionOracle, HandleTarget, RelayerOracle};
pub use signer::{AuthorizationRequest, LocalAuthorizationSigner, SignerCapability};
pub use store::{AuthorizationStore, InMemoryAuthorizationStore, SledAuthorizationStore};
pub use submission::{AuxiliaryParams, SubmissionClient};
pub use types::*;
