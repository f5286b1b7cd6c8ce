use anyhow::{bail, Result};
use serde::Serialize;

use super::IdentifyArgs;
use crate::db::Database;
use crate::models::{ClusterView, Observation};
use crate::reconcile::Reconciler;

/// Response envelope shared by the CLI and the HTTP endpoint.
#[derive(Debug, Serialize)]
pub struct IdentifyResponse<'a> {
    pub contact: &'a ClusterView,
}

pub fn run_identify(db: &mut Database, reconciler: &Reconciler, args: IdentifyArgs) -> Result<()> {
    let observation = Observation::new(args.email, args.phone);
    let view = reconciler.reconcile(db, &observation)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&IdentifyResponse { contact: &view })?
    );
    Ok(())
}

pub fn run_show(db: &mut Database, reconciler: &Reconciler, id: i64) -> Result<()> {
    let Some(view) = reconciler.cluster_for(db, id)? else {
        bail!("No contact with id {}", id);
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&IdentifyResponse { contact: &view })?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_then_show() {
        let mut db = Database::open_memory().unwrap();
        let reconciler = Reconciler::default();

        run_identify(
            &mut db,
            &reconciler,
            IdentifyArgs {
                email: Some("a@x.com".to_string()),
                phone: None,
            },
        )
        .unwrap();
        assert_eq!(db.count_contacts().unwrap(), 1);

        run_show(&mut db, &reconciler, 1).unwrap();
        assert!(run_show(&mut db, &reconciler, 2).is_err());
    }

    #[test]
    fn test_identify_requires_input() {
        let mut db = Database::open_memory().unwrap();
        let err = run_identify(
            &mut db,
            &Reconciler::default(),
            IdentifyArgs {
                email: None,
                phone: None,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_response_envelope() {
        let view = ClusterView {
            primary_contact_id: 1,
            emails: vec!["a@x.com".to_string()],
            phone_numbers: vec![],
            secondary_contact_ids: vec![],
        };
        let value = serde_json::to_value(IdentifyResponse { contact: &view }).unwrap();
        assert_eq!(value["contact"]["primaryContactId"], 1);
        assert_eq!(value["contact"]["emails"][0], "a@x.com");
    }
}
