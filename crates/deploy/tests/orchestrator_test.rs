//! Integration tests for forgeline-deploy.
//!
//! Each test drives the orchestrator against an in-memory [`common::MockChain`]
//! with the config store and deployment records on disk in a temp dir.
//! Run with: cargo test --test orchestrator_test

mod common;

use alloy_core::primitives::{Address, B256, keccak256};
use alloy_sol_types::SolCall;
use anyhow::Result;
use forgeline_deploy::{
    ActionStatus, AddressArg, AllowList, DeployError, DeploymentUnit, GasPolicy, NetworkProfile,
    OrchestratorBuilder, ParamSource, ParamType, PlannedStep, PostDeployAction, RecordStore, RoleId,
    RunPolicy, UnitStatus,
};

use common::{
    CHAIN_ID, DEPLOYER, MockChain, TestContext, artifacts, created_address, init_test_tracing,
    transferOwnershipCall,
};

const DAO: Address = Address::with_last_byte(0xd0);

fn unit_a() -> DeploymentUnit {
    DeploymentUnit::new("A", "A_ADDRESS")
}

fn unit_b() -> DeploymentUnit {
    DeploymentUnit::new("B", "B_ADDRESS").param(
        "a",
        ParamType::Address,
        ParamSource::store_key("A_ADDRESS"),
    )
}

fn dao() -> AddressArg {
    AddressArg(ParamSource::External {
        key: Some("DAO_ADDRESS".to_string()),
    })
}

/// Grant, then hand over ownership, then initialize.
fn unit_c() -> DeploymentUnit {
    DeploymentUnit::new("C", "C_ADDRESS")
        .param("admin", ParamType::Address, ParamSource::Deployer)
        .action(PostDeployAction::GrantRole {
            role: RoleId::new("MINTER_ROLE"),
            grantee: dao(),
        })
        .action(PostDeployAction::TransferOwnership { new_owner: dao() })
        .action(PostDeployAction::Initialize {
            signature: "initialize()".to_string(),
            args: vec![],
            skip_if: Some("initialized".to_string()),
        })
}

fn statuses(report: &forgeline_deploy::ActionReport) -> Vec<&ActionStatus> {
    report.entries.iter().map(|entry| &entry.status).collect()
}

#[tokio::test]
async fn test_unlisted_network_is_rejected_without_calls() -> Result<()> {
    init_test_tracing();
    let chain = MockChain::new();

    let mut orchestrator = OrchestratorBuilder::new(&chain, artifacts(&["A"]))
        .network(NetworkProfile {
            name: "goerli".to_string(),
            chain_id: 5,
            production: false,
        })
        .allow_list(AllowList::chain_ids([1]))
        .build()?;

    let err = orchestrator.run(&[unit_a()]).await.expect_err("network 5 is not allowed");

    assert!(matches!(err.error, DeployError::UnsafeNetwork(ref e) if e.chain_id == 5));
    assert_eq!(chain.calls(), 0);
    assert!(err.completed.units.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_endpoint_reporting_other_chain_is_rejected() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-identity");
    let chain = MockChain::new().reporting_chain_id(5);
    let mut orchestrator = ctx.orchestrator(&chain, &["A"], RunPolicy::default());

    let err = orchestrator.run(&[unit_a()]).await.expect_err("chain id mismatch");

    assert!(matches!(err.error, DeployError::UnsafeNetwork(_)));
    assert_eq!(chain.calls(), 1);
    assert!(chain.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_dependency_fails_before_broadcast() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-missing");
    let chain = MockChain::new();
    let mut orchestrator = ctx.orchestrator(&chain, &["B"], RunPolicy::default());

    let err = orchestrator.run(&[unit_b()]).await.expect_err("A_ADDRESS is missing");

    match &err.error {
        DeployError::Validation(e) => {
            assert_eq!(e.unit, "B");
            assert_eq!(e.missing_keys().collect::<Vec<_>>(), vec!["A_ADDRESS"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(chain.sent().is_empty());
    assert_eq!(ctx.store_content(), None);
    Ok(())
}

#[tokio::test]
async fn test_every_invalid_parameter_is_reported() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-aggregate");
    ctx.seed_store("BAD_ADDRESS=0x1234\n");
    let chain = MockChain::new();
    let unit = DeploymentUnit::new("Vault", "VAULT_ADDRESS")
        .param("token", ParamType::Address, ParamSource::store_key("BAD_ADDRESS"))
        .param(
            "cap",
            ParamType::Integer,
            ParamSource::External {
                key: Some("VAULT_CAP".to_string()),
            },
        )
        .param(
            "dao",
            ParamType::Address,
            ParamSource::External {
                key: Some("DAO_ADDRESS".to_string()),
            },
        );
    let mut orchestrator = ctx.orchestrator(&chain, &["Vault"], RunPolicy::default());

    let err = orchestrator.run(&[unit]).await.expect_err("two parameters are invalid");

    let DeployError::Validation(e) = &err.error else {
        panic!("expected validation error, got {:?}", err.error);
    };
    assert_eq!(e.params().collect::<Vec<_>>(), vec!["cap", "token"]);
    assert!(e.issues[0].is_missing());
    assert!(e.issues[1].is_malformed());
    assert!(chain.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dependency_receives_produced_address() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-propagate");
    let chain = MockChain::new();
    let mut orchestrator = ctx.orchestrator(&chain, &["A", "B"], RunPolicy::default());

    // declared consumer first; the graph puts A before B
    let report = orchestrator.run(&[unit_b(), unit_a()]).await?;

    let a_address = created_address(0);
    assert_eq!(report.units[0].unit, "A");
    assert_eq!(report.units[0].address, a_address);
    assert_eq!(report.units[1].unit, "B");

    let creations = chain.creations();
    assert_eq!(creations.len(), 2);
    let b_data = &creations[1].data;
    assert_eq!(&b_data[..4], &common::BYTECODE);
    assert_eq!(&b_data[4 + 12..4 + 32], a_address.as_slice());

    let a_checksummed = a_address.to_checksum(None);
    assert_eq!(orchestrator.store().get("A_ADDRESS"), Some(a_checksummed.as_str()));
    let content = ctx.store_content().unwrap_or_default();
    assert!(content.contains(&format!("# ===== A =====\nA_ADDRESS={}\n", a_checksummed)));

    let records = RecordStore::load(ctx.records_path())?;
    assert_eq!(records.records().len(), 2);
    assert_eq!(records.find("B", CHAIN_ID).count(), 1);
    assert_eq!(records.records()[0].deployer, DEPLOYER);
    Ok(())
}

#[tokio::test]
async fn test_malformed_stored_dependency_blocks_dependent() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-malformed");
    ctx.seed_store("A_ADDRESS=0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n");
    let chain = MockChain::new();
    let mut orchestrator = ctx.orchestrator(&chain, &["B"], RunPolicy::default());

    let err = orchestrator.run(&[unit_b()]).await.expect_err("stored address is too short");

    match &err.error {
        DeployError::Validation(e) => assert!(e.issues.iter().all(|i| i.is_malformed())),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(chain.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_partial_wiring_is_reported_and_run_continues() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-partial");
    let chain = MockChain::new();
    chain.fail_selector(transferOwnershipCall::SELECTOR);
    let mut orchestrator = ctx.orchestrator(&chain, &["C", "A"], RunPolicy::default());

    let report = orchestrator.run(&[unit_c(), unit_a()]).await?;

    let c = report.unit("C").expect("C was deployed");
    assert_eq!(c.status, UnitStatus::Deployed);
    assert!(c.record.is_some());
    assert!(matches!(
        statuses(&c.actions).as_slice(),
        [
            ActionStatus::Completed { .. },
            ActionStatus::Failed { .. },
            ActionStatus::NotAttempted
        ]
    ));

    assert_eq!(report.partial.len(), 1);
    let partial = &report.partial[0];
    assert_eq!(partial.unit, "C");
    assert_eq!(partial.failed_action, "transferOwnership");
    assert!(partial.record.is_some());

    // the grant stays, ownership never moved, initialize never ran
    assert!(chain.has_role(c.address, keccak256("MINTER_ROLE"), DAO));
    assert_eq!(chain.owner_of(c.address), Some(DEPLOYER));
    assert!(!chain.is_initialized(c.address));

    // still recorded, and the next unit ran
    assert!(orchestrator.store().contains("C_ADDRESS"));
    assert_eq!(report.unit("A").map(|u| &u.status), Some(&UnitStatus::Deployed));
    Ok(())
}

#[tokio::test]
async fn test_halt_on_partial_policy_stops_the_run() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-halt");
    let chain = MockChain::new();
    chain.fail_selector(transferOwnershipCall::SELECTOR);
    let policy = RunPolicy {
        halt_on_partial: true,
        ..Default::default()
    };
    let mut orchestrator = ctx.orchestrator(&chain, &["C", "A"], policy);

    let err = orchestrator.run(&[unit_c(), unit_a()]).await.expect_err("partial wiring halts");

    assert!(matches!(err.error, DeployError::PartialDeployment(ref e) if e.unit == "C"));
    assert_eq!(err.completed.units.len(), 1);
    assert!(orchestrator.store().contains("C_ADDRESS"));
    assert!(!orchestrator.store().contains("A_ADDRESS"));
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_idempotent() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-rerun");
    let chain = MockChain::new();
    let units = [unit_a(), unit_b(), unit_c()];

    ctx.orchestrator(&chain, &["A", "B", "C"], RunPolicy::default())
        .run(&units)
        .await?;
    let store_before = ctx.store_content();
    let records_before = RecordStore::load(ctx.records_path())?.records().to_vec();
    let sent_before = chain.sent().len();

    let report = ctx
        .orchestrator(&chain, &["A", "B", "C"], RunPolicy::default())
        .run(&units)
        .await?;

    assert!(report.units.iter().all(|u| u.status == UnitStatus::AlreadyDeployed));
    assert_eq!(chain.sent().len(), sent_before);
    assert_eq!(ctx.store_content(), store_before);
    assert_eq!(RecordStore::load(ctx.records_path())?.records(), records_before.as_slice());

    let c = report.unit("C").expect("C is reported");
    assert!(c.actions.entries.iter().all(|e| e.status == ActionStatus::Skipped));
    Ok(())
}

#[tokio::test]
async fn test_rerun_completes_partial_wiring() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-resume");
    let chain = MockChain::new();
    chain.fail_selector(transferOwnershipCall::SELECTOR);

    ctx.orchestrator(&chain, &["C"], RunPolicy::default())
        .run(&[unit_c()])
        .await?;
    chain.clear_failures();

    let report = ctx
        .orchestrator(&chain, &["C"], RunPolicy::default())
        .run(&[unit_c()])
        .await?;

    let c = report.unit("C").expect("C is reported");
    assert_eq!(c.status, UnitStatus::AlreadyDeployed);
    assert!(matches!(
        statuses(&c.actions).as_slice(),
        [
            ActionStatus::Skipped,
            ActionStatus::Completed { .. },
            ActionStatus::Completed { .. }
        ]
    ));
    assert!(report.is_fully_wired());
    assert_eq!(chain.owner_of(c.address), Some(DAO));
    assert!(chain.is_initialized(c.address));
    assert_eq!(chain.creations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_rerun_without_resume_leaves_wiring_alone() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-noresume");
    let chain = MockChain::new();
    chain.fail_selector(transferOwnershipCall::SELECTOR);
    ctx.orchestrator(&chain, &["C"], RunPolicy::default())
        .run(&[unit_c()])
        .await?;
    let sent_before = chain.sent().len();

    let policy = RunPolicy {
        resume_wiring: false,
        ..Default::default()
    };
    let report = ctx.orchestrator(&chain, &["C"], policy).run(&[unit_c()]).await?;

    assert!(report.units[0].actions.entries.is_empty());
    assert_eq!(chain.sent().len(), sent_before);
    Ok(())
}

#[tokio::test]
async fn test_estimate_is_scaled() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-estimate");
    let chain = MockChain::new();
    let unit = unit_a().gas(GasPolicy {
        multiplier: 1.5,
        fallback: 3_000_000,
    });
    let mut orchestrator = ctx.orchestrator(&chain, &["A"], RunPolicy::default());

    let report = orchestrator.run(&[unit]).await?;

    assert_eq!(chain.creations()[0].gas, Some(1_500_000));
    assert!(report.fallbacks.is_empty());
    let record = report.units[0].record.as_ref().expect("A has a record");
    assert_eq!(record.gas_budget, 1_500_000);
    Ok(())
}

#[tokio::test]
async fn test_estimation_failure_uses_fallback() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-fallback");
    let chain = MockChain::new().failing_estimates();
    let unit = unit_a().gas(GasPolicy {
        multiplier: 1.3,
        fallback: 3_000_000,
    });
    let mut orchestrator = ctx.orchestrator(&chain, &["A"], RunPolicy::default());

    let report = orchestrator.run(&[unit]).await?;

    assert_eq!(chain.creations()[0].gas, Some(3_000_000));
    assert_eq!(report.fallbacks.len(), 1);
    assert_eq!(report.fallbacks[0].unit, "A");
    assert!(report.units[0].budget.as_ref().is_some_and(|b| b.is_fallback()));
    Ok(())
}

#[tokio::test]
async fn test_multiplier_must_exceed_one() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-multiplier");
    let chain = MockChain::new();
    let unit = unit_a().gas(GasPolicy {
        multiplier: 1.0,
        fallback: 3_000_000,
    });
    let mut orchestrator = ctx.orchestrator(&chain, &["A"], RunPolicy::default());

    let err = orchestrator.run(&[unit]).await.expect_err("multiplier of 1 is rejected");

    assert!(matches!(err.error, DeployError::Validation(_)));
    assert_eq!(chain.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_revert_halts_run_and_records_nothing() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-revert");
    let chain = MockChain::new().reverting_creations();
    let mut orchestrator = ctx.orchestrator(&chain, &["A", "B"], RunPolicy::default());

    let err = orchestrator.run(&[unit_a(), unit_b()]).await.expect_err("creation reverts");

    assert!(matches!(err.error, DeployError::DeploymentReverted { ref unit, .. } if unit == "A"));
    assert_eq!(err.error.unit(), Some("A"));
    assert_eq!(chain.creations().len(), 1);
    assert_eq!(ctx.store_content(), None);
    assert!(RecordStore::load(ctx.records_path())?.records().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_confirmation_timeout_carries_transaction_hash() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-timeout");
    let chain = MockChain::new().never_confirming();
    let mut orchestrator = ctx.orchestrator(&chain, &["A"], RunPolicy::default());

    let err = orchestrator.run(&[unit_a()]).await.expect_err("never confirms");

    match err.error {
        DeployError::ConfirmationTimeout { unit, tx_hash, .. } => {
            assert_eq!(unit, "A");
            assert_eq!(tx_hash, B256::with_last_byte(1));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(ctx.store_content(), None);
    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_fails_before_broadcast() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-artifact");
    let chain = MockChain::new();
    let mut orchestrator = ctx.orchestrator(&chain, &[], RunPolicy::default());

    let err = orchestrator.run(&[unit_a()]).await.expect_err("no creation code");

    assert!(matches!(err.error, DeployError::Artifact { .. }));
    assert!(chain.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_transaction() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-cycle");
    let chain = MockChain::new();
    let a = unit_a().param("b", ParamType::Address, ParamSource::store_key("B_ADDRESS"));
    let mut orchestrator = ctx.orchestrator(&chain, &["A", "B"], RunPolicy::default());

    let err = orchestrator.run(&[a, unit_b()]).await.expect_err("A and B depend on each other");

    assert!(matches!(err.error, DeployError::Graph(_)));
    assert!(chain.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_plan_orders_and_validates_without_calls() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-plan");
    ctx.seed_store("A_ADDRESS=0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n");
    let chain = MockChain::new();
    let needs_input = DeploymentUnit::new("Treasury", "TREASURY_ADDRESS").param(
        "TREASURY_CAP",
        ParamType::Integer,
        ParamSource::external(),
    );
    let orchestrator = ctx.orchestrator(&chain, &["A", "B", "Treasury"], RunPolicy::default());

    let plan = orchestrator.plan(&[unit_b(), unit_a(), needs_input])?;

    assert_eq!(
        plan.steps,
        vec![
            PlannedStep::AlreadyDeployed {
                unit: "A".to_string(),
                address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            },
            PlannedStep::Deploy {
                unit: "B".to_string(),
                output_key: "B_ADDRESS".to_string(),
            },
            PlannedStep::Deploy {
                unit: "Treasury".to_string(),
                output_key: "TREASURY_ADDRESS".to_string(),
            },
        ]
    );
    assert_eq!(plan.invalid.len(), 1);
    assert_eq!(plan.invalid[0].unit, "Treasury");
    assert_eq!(chain.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_plan_resolves_recorded_units_like_a_run() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-plan-recorded");
    ctx.seed_store("V_ADDRESS=0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n");
    let chain = MockChain::new();
    // CAP is never supplied; only a fresh deployment would read it.
    let vault = || {
        DeploymentUnit::new("V", "V_ADDRESS")
            .param("CAP", ParamType::Integer, ParamSource::external())
            .action(PostDeployAction::GrantRole {
                role: RoleId::new("MINTER_ROLE"),
                grantee: dao(),
            })
    };

    let plan = ctx
        .orchestrator(&chain, &["V"], RunPolicy::default())
        .plan(&[vault()])?;
    assert!(plan.invalid.is_empty(), "{:?}", plan.invalid);

    let report = ctx
        .orchestrator(&chain, &["V"], RunPolicy::default())
        .run(&[vault()])
        .await?;
    assert_eq!(report.units[0].status, UnitStatus::AlreadyDeployed);
    let sent_after_run = chain.sent().len();

    // resumed wiring still needs its own inputs
    let unknown_owner = vault().action(PostDeployAction::TransferOwnership {
        new_owner: AddressArg(ParamSource::External {
            key: Some("NEW_OWNER".to_string()),
        }),
    });
    let plan = ctx
        .orchestrator(&chain, &["V"], RunPolicy::default())
        .plan(std::slice::from_ref(&unknown_owner))?;
    assert_eq!(plan.invalid.len(), 1);
    assert_eq!(plan.invalid[0].missing_keys().collect::<Vec<_>>(), vec!["NEW_OWNER"]);

    let no_resume = RunPolicy {
        resume_wiring: false,
        ..Default::default()
    };
    let plan = ctx
        .orchestrator(&chain, &["V"], no_resume)
        .plan(&[unknown_owner])?;
    assert!(plan.invalid.is_empty());
    assert_eq!(chain.sent().len(), sent_after_run);
    Ok(())
}

#[tokio::test]
async fn test_initialize_without_skip_if_is_rejected() -> Result<()> {
    init_test_tracing();
    let ctx = TestContext::new("forgeline-unguarded");
    let chain = MockChain::new();
    let unguarded = DeploymentUnit::new("L", "L_ADDRESS").action(PostDeployAction::Initialize {
        signature: "initialize()".to_string(),
        args: vec![],
        skip_if: None,
    });

    let err = ctx
        .orchestrator(&chain, &["L"], RunPolicy::default())
        .run(std::slice::from_ref(&unguarded))
        .await
        .expect_err("an initializer without skip_if is rejected");

    match &err.error {
        DeployError::Validation(e) => {
            assert_eq!(e.unit, "L");
            assert_eq!(e.params().collect::<Vec<_>>(), vec!["actions.0"]);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(chain.calls(), 0);
    assert!(ctx.store_content().is_none());

    let planned = ctx
        .orchestrator(&chain, &["L"], RunPolicy::default())
        .plan(&[unguarded]);
    assert!(matches!(planned, Err(DeployError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn test_output_key_must_read_back_from_store() -> Result<()> {
    init_test_tracing();
    for key in [" PADDED_ADDRESS", "export X_ADDRESS", "#H_ADDRESS"] {
        let ctx = TestContext::new("forgeline-bad-key");
        let chain = MockChain::new();
        let unit = DeploymentUnit::new("K", key);

        let err = ctx
            .orchestrator(&chain, &["K"], RunPolicy::default())
            .run(&[unit])
            .await
            .expect_err("key is rejected");

        match &err.error {
            DeployError::Validation(e) => {
                assert_eq!(e.params().collect::<Vec<_>>(), vec!["output_key"], "{key:?}");
            }
            other => panic!("expected a validation error for {key:?}, got {other:?}"),
        }
        assert!(chain.creations().is_empty(), "{key:?}");
        assert!(ctx.store_content().is_none(), "{key:?}");
    }
    Ok(())
}

#[test]
fn test_builder_requires_network() {
    let chain = MockChain::new();
    assert!(OrchestratorBuilder::new(&chain, artifacts(&[])).build().is_err());
}
