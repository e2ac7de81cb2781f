// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

//! The loan risk pipeline: encrypt an application, submit it, read the result handles
//! and decrypt them into a report.

use crate::cancel::CancelSignal;
use crate::decrypt::{DecryptOutcome, DecryptionOrchestrator};
use crate::error::{Error, Result};
use crate::handles::{FetchedHandles, HandleFetcher};
use crate::input::{InputBuilder, PlaintextInput};
use crate::oracle::HandleTarget;
use crate::signer::SignerCapability;
use crate::submission::{AuxiliaryParams, SubmissionClient};
use crate::types::{DecryptedValue, ResultHandle, TransactionReceipt, Width};
use alloy::primitives::{utils::parse_ether, Address, U256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use veil_evm::contracts::{LOAN_RATE_BPS, RISK_FACTOR, RISK_LEVEL};
use veil_evm::LOAN_RISK_OUTPUTS;

pub const CREDIT_SCORE: &str = "creditScore";
pub const INCOME: &str = "income";
pub const DEBT_RATIO_BPS: &str = "debtRatioBps";

/// Parameters of the deployed computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProfile {
    /// Income is submitted as `floor(wei / income_prescale)`
    pub income_prescale: u64,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            income_prescale: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanApplication {
    pub credit_score: u16,
    pub income_wei: U256,
    pub debt_ratio_bps: u32,
    pub lender: Option<Address>,
}

impl LoanApplication {
    /// Parse a decimal ether amount such as `"1.5"` into wei
    pub fn parse_income(ether: &str) -> Result<U256> {
        parse_ether(ether.trim()).map_err(|e| Error::out_of_range(INCOME, e.to_string()))
    }

    pub fn prescaled_income(&self, profile: &TargetProfile) -> Result<u64> {
        if profile.income_prescale == 0 {
            return Err(Error::out_of_range(INCOME, "income prescale must not be zero"));
        }
        let scaled = self.income_wei / U256::from(profile.income_prescale);
        u64::try_from(scaled).map_err(|_| {
            Error::out_of_range(INCOME, "income does not fit in 64 bits after prescaling")
        })
    }

    fn plaintexts(&self, profile: &TargetProfile) -> Result<Vec<PlaintextInput>> {
        Ok(vec![
            PlaintextInput::new(CREDIT_SCORE, Width::U16, self.credit_score.into())?,
            PlaintextInput::new(INCOME, Width::U64, self.prescaled_income(profile)?.into())?,
            PlaintextInput::new(DEBT_RATIO_BPS, Width::U32, self.debt_ratio_bps.into())?,
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskGrade {
    A,
    B,
    C,
}

impl RiskGrade {
    pub fn from_level(level: u64) -> Option<Self> {
        match level {
            0 => Some(RiskGrade::A),
            1 => Some(RiskGrade::B),
            2 => Some(RiskGrade::C),
            _ => None,
        }
    }

    /// Grade the raw risk factor should produce
    pub fn for_factor(factor: u64) -> Self {
        match factor {
            f if f < 10_000 => RiskGrade::A,
            f if f < 50_000 => RiskGrade::B,
            _ => RiskGrade::C,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskGrade::A => "A (Excellent)",
            RiskGrade::B => "B (Good)",
            RiskGrade::C => "C (Fair)",
        }
    }
}

impl fmt::Display for RiskGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Render basis points as a percentage with two decimals
pub fn format_rate(bps: u64) -> String {
    format!("{}.{:02}%", bps / 100, bps % 100)
}

/// Decrypted outputs of the loan risk computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanRiskReport {
    pub risk_level: u64,
    pub loan_rate_bps: u64,
    pub risk_factor: u64,
}

impl LoanRiskReport {
    pub fn grade(&self) -> Option<RiskGrade> {
        RiskGrade::from_level(self.risk_level)
    }

    pub fn expected_grade(&self) -> RiskGrade {
        RiskGrade::for_factor(self.risk_factor)
    }

    pub fn rate_display(&self) -> String {
        format_rate(self.loan_rate_bps)
    }
}

impl fmt::Display for LoanRiskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.grade() {
            Some(grade) => writeln!(f, "Risk grade:  {grade}")?,
            None => writeln!(f, "Risk grade:  unknown level {}", self.risk_level)?,
        }
        writeln!(f, "Loan rate:   {}", self.rate_display())?;
        write!(
            f,
            "Risk factor: {} (expected grade {})",
            self.risk_factor,
            self.expected_grade()
        )
    }
}

/// What the decrypt stage produced
#[derive(Debug)]
pub enum RiskAssessment {
    /// Some result handles are still empty. Nothing was sent to the oracle.
    NotReady,
    Decrypted(LoanRiskReport),
    TimedOut { deadline: Duration },
    Stale,
    Failed(Error),
}

impl RiskAssessment {
    pub fn into_report(self) -> Result<Option<LoanRiskReport>> {
        match self {
            RiskAssessment::NotReady => Ok(None),
            RiskAssessment::Decrypted(report) => Ok(Some(report)),
            RiskAssessment::TimedOut { deadline } => Err(Error::TimedOut(deadline)),
            RiskAssessment::Stale => Err(Error::Stale),
            RiskAssessment::Failed(err) => Err(err),
        }
    }
}

fn output_value(
    values: &BTreeMap<ResultHandle, DecryptedValue>,
    fetched: &FetchedHandles,
    output: &str,
) -> Result<u64> {
    fetched
        .get(output)
        .and_then(|handle| values.get(&handle))
        .map(|decrypted| decrypted.value.as_u64())
        .ok_or_else(|| Error::Failed(format!("no decrypted value for {output}")))
}

/// Runs the loan risk computation for one borrower
pub struct LoanRiskFlow {
    inputs: InputBuilder,
    submission: SubmissionClient,
    fetcher: HandleFetcher,
    decryption: Arc<DecryptionOrchestrator>,
    profile: TargetProfile,
}

impl LoanRiskFlow {
    pub fn new(
        inputs: InputBuilder,
        submission: SubmissionClient,
        fetcher: HandleFetcher,
        decryption: Arc<DecryptionOrchestrator>,
        profile: TargetProfile,
    ) -> Self {
        Self {
            inputs,
            submission,
            fetcher,
            decryption,
            profile,
        }
    }

    /// Encrypt `application` for `submitter` and send it to the target
    #[instrument(skip_all, fields(%submitter))]
    pub async fn submit(
        &self,
        submitter: Address,
        application: &LoanApplication,
        cancel: Option<&CancelSignal>,
    ) -> Result<TransactionReceipt> {
        let plaintexts = application.plaintexts(&self.profile)?;
        let inputs = self.inputs.clone();
        let target = self.submission.target();
        let batch = tokio::task::spawn_blocking(move || inputs.build(target, submitter, plaintexts))
            .await
            .map_err(|e| Error::EncryptionFailure(format!("encryption task failed: {e}")))??;

        let aux = AuxiliaryParams {
            secondary_identity: application.lender,
        };
        self.submission.submit(batch, aux, cancel).await
    }

    pub async fn fetch(&self, subject: Address) -> Result<FetchedHandles> {
        self.fetcher.fetch(subject, LOAN_RISK_OUTPUTS).await
    }

    #[instrument(skip_all, fields(subject = %fetched.subject()))]
    pub async fn decrypt(
        &self,
        fetched: &FetchedHandles,
        signer: &dyn SignerCapability,
        cancel: Option<&CancelSignal>,
    ) -> RiskAssessment {
        if !fetched.is_complete() {
            info!("result handles are not ready");
            return RiskAssessment::NotReady;
        }

        let handles: Vec<HandleTarget> = LOAN_RISK_OUTPUTS
            .iter()
            .filter_map(|output| fetched.get(output))
            .map(|handle| HandleTarget {
                handle,
                target: fetched.target(),
            })
            .collect();

        let values = match self.decryption.decrypt(&handles, signer, cancel).await {
            DecryptOutcome::Succeeded(values) => values,
            DecryptOutcome::TimedOut { deadline } => return RiskAssessment::TimedOut { deadline },
            DecryptOutcome::Stale { .. } => return RiskAssessment::Stale,
            DecryptOutcome::Failed(err) => return RiskAssessment::Failed(err),
        };

        let report = (|| -> Result<LoanRiskReport> {
            Ok(LoanRiskReport {
                risk_level: output_value(&values, fetched, RISK_LEVEL)?,
                loan_rate_bps: output_value(&values, fetched, LOAN_RATE_BPS)?,
                risk_factor: output_value(&values, fetched, RISK_FACTOR)?,
            })
        })();
        match report {
            Ok(report) => {
                if report.grade() != Some(report.expected_grade()) {
                    warn!(
                        risk_level = report.risk_level,
                        risk_factor = report.risk_factor,
                        "risk level does not match the risk factor"
                    );
                }
                RiskAssessment::Decrypted(report)
            }
            Err(err) => RiskAssessment::Failed(err),
        }
    }

    /// Submit, read the handles back and decrypt them, all as the signer's identity
    pub async fn run(
        &self,
        application: &LoanApplication,
        signer: &dyn SignerCapability,
        cancel: Option<&CancelSignal>,
    ) -> Result<(TransactionReceipt, RiskAssessment)> {
        let borrower = signer.address();
        let receipt = self.submit(borrower, application, cancel).await?;
        let fetched = self.fetch(borrower).await?;
        let assessment = self.decrypt(&fetched, signer, cancel).await;
        Ok((receipt, assessment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{AuthorizationCache, AuthorizationSettings};
    use crate::clock::SystemClock;
    use crate::context::{ContextTracker, ExecutionContext};
    use crate::decrypt::testing::ScriptedOracle;
    use crate::handles::testing::MapReader;
    use crate::input::testing::TransparentBackend;
    use crate::signer::testing::CountingSigner;
    use crate::store::InMemoryAuthorizationStore;
    use crate::submission::testing::RecordingTarget;
    use crate::types::{result_handle, ClearValue, FheType};
    use alloy::primitives::address;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    const NETWORK: u64 = 31337;
    const VERIFIER: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const TARGET: Address = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
    const BORROWER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    struct Harness {
        flow: LoanRiskFlow,
        target: Arc<RecordingTarget>,
        reader: Arc<MapReader>,
        oracle: Arc<ScriptedOracle>,
    }

    fn outputs() -> [(&'static str, ResultHandle, u64); 3] {
        [
            (RISK_LEVEL, result_handle(1, FheType::Uint8, NETWORK), 1),
            (LOAN_RATE_BPS, result_handle(2, FheType::Uint32, NETWORK), 725),
            (RISK_FACTOR, result_handle(3, FheType::Uint32, NETWORK), 21_000),
        ]
    }

    fn harness() -> Harness {
        harness_as(BORROWER)
    }

    fn harness_as(identity: Address) -> Harness {
        let target = Arc::new(RecordingTarget::new(TARGET));
        let reader = Arc::new(MapReader::new(TARGET));
        let oracle = Arc::new(ScriptedOracle::new(
            outputs()
                .into_iter()
                .map(|(_, handle, value)| (handle, ClearValue::Uint(value))),
        ));
        let cache = Arc::new(AuthorizationCache::new(
            Arc::new(InMemoryAuthorizationStore::default()),
            Arc::new(SystemClock),
            AuthorizationSettings {
                verifying_contracts: HashMap::from([(NETWORK, VERIFIER)]),
                ..Default::default()
            },
        ));
        let tracker = Arc::new(ContextTracker::new(Some(ExecutionContext {
            network: NETWORK,
            identity,
        })));
        let flow = LoanRiskFlow::new(
            InputBuilder::new(Arc::new(TransparentBackend), NETWORK),
            SubmissionClient::new(target.clone()),
            HandleFetcher::new(reader.clone()),
            Arc::new(DecryptionOrchestrator::new(oracle.clone(), cache, tracker)),
            TargetProfile::default(),
        );
        Harness {
            flow,
            target,
            reader,
            oracle,
        }
    }

    fn application() -> Result<LoanApplication> {
        Ok(LoanApplication {
            credit_score: 750,
            income_wei: LoanApplication::parse_income("120")?,
            debt_ratio_bps: 1500,
            lender: None,
        })
    }

    #[test]
    fn test_income_is_prescaled() -> Result<()> {
        let app = application()?;
        assert_eq!(app.prescaled_income(&TargetProfile::default())?, 120_000_000_000);

        let half = LoanApplication::parse_income("1.5")?;
        assert_eq!(half, U256::from(1_500_000_000_000_000_000u64));
        assert!(LoanApplication::parse_income("one").is_err());

        let huge = LoanApplication {
            income_wei: U256::MAX,
            ..app
        };
        assert!(matches!(
            huge.prescaled_income(&TargetProfile::default()),
            Err(Error::InputOutOfRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_grades_and_rates() {
        assert_eq!(RiskGrade::from_level(0), Some(RiskGrade::A));
        assert_eq!(RiskGrade::from_level(2).map(|g| g.label()), Some("C (Fair)"));
        assert_eq!(RiskGrade::from_level(3), None);
        assert_eq!(RiskGrade::for_factor(9_999), RiskGrade::A);
        assert_eq!(RiskGrade::for_factor(10_000), RiskGrade::B);
        assert_eq!(RiskGrade::for_factor(50_000), RiskGrade::C);
        assert_eq!(format_rate(725), "7.25%");
        assert_eq!(format_rate(1_000), "10.00%");
        assert_eq!(format_rate(5), "0.05%");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fetch_before_submission_is_not_ready() -> Result<()> {
        let h = harness();
        let fetched = h.flow.fetch(BORROWER).await?;
        assert!(!fetched.is_ready());

        let signer = CountingSigner::new(BORROWER);
        let assessment = h.flow.decrypt(&fetched, &signer, None).await;
        assert!(matches!(assessment, RiskAssessment::NotReady));
        assert_eq!(signer.calls(), 0);
        assert_eq!(h.oracle.calls(), 0);
        assert!(logs_contain("result handles are not ready"));
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_fetch_decrypt() -> Result<()> {
        let h = harness();
        let signer = CountingSigner::new(BORROWER);

        let receipt = h.flow.submit(BORROWER, &application()?, None).await?;
        assert_eq!(receipt.block_number, Some(42));
        {
            let submitted = h.target.submitted.lock().unwrap();
            assert_eq!(submitted.len(), 1);
            assert_eq!(submitted[0].lender, Address::ZERO);
        }

        for (output, handle, _) in outputs() {
            h.reader.set(BORROWER, output, handle);
        }
        let fetched = h.flow.fetch(BORROWER).await?;
        assert!(fetched.is_complete());

        let report = h
            .flow
            .decrypt(&fetched, &signer, None)
            .await
            .into_report()?
            .ok_or_else(|| Error::Failed("expected a report".into()))?;
        assert_eq!(report.grade(), Some(RiskGrade::B));
        assert_eq!(report.rate_display(), "7.25%");
        assert_eq!(report.expected_grade(), RiskGrade::B);
        assert_eq!(signer.calls(), 1);
        assert_eq!(h.oracle.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lender_decrypts_borrower_results() -> Result<()> {
        let lender = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let h = harness_as(lender);
        for (output, handle, _) in outputs() {
            h.reader.set(BORROWER, output, handle);
        }

        let fetched = h.flow.fetch(BORROWER).await?;
        assert_eq!(fetched.subject(), BORROWER);
        assert!(!h.flow.fetch(lender).await?.is_ready());

        let signer = CountingSigner::new(lender);
        let report = h
            .flow
            .decrypt(&fetched, &signer, None)
            .await
            .into_report()?
            .ok_or_else(|| Error::Failed("expected a report".into()))?;
        assert_eq!(report.loan_rate_bps, 725);
        assert_eq!(signer.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reports_lender_and_not_ready() -> Result<()> {
        let h = harness();
        let lender = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let app = LoanApplication {
            lender: Some(lender),
            ..application()?
        };

        let (_, assessment) = h.flow.run(&app, &CountingSigner::new(BORROWER), None).await?;
        assert!(matches!(assessment, RiskAssessment::NotReady));
        assert_eq!(h.target.submitted.lock().unwrap()[0].lender, lender);
        Ok(())
    }

    #[tokio::test]
    async fn test_income_overflow_is_refused_before_submission() {
        let h = harness();
        let app = LoanApplication {
            credit_score: 750,
            income_wei: U256::MAX,
            debt_ratio_bps: 1500,
            lender: None,
        };
        let err = h.flow.submit(BORROWER, &app, None).await.unwrap_err();
        assert!(matches!(err, Error::InputOutOfRange { .. }));
        assert!(h.target.submitted.lock().unwrap().is_empty());
    }
}
