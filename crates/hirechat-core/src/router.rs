use std::collections::BTreeSet;

use tracing::debug;

use hirechat_db::Database;
use hirechat_types::filters::{Conjunction, JobFilter, Predicate, StaffRole};

use crate::error::ChatResult;

/// Sales-team ownership of freelancers, owned by the team-management system.
pub trait SalesAssignments {
    /// Freelancers assigned to `sales_user_id` (`belongs = true`) or to any
    /// other sales rep (`belongs = false`).
    fn team_freelancer_ids(&self, sales_user_id: i64, belongs: bool) -> anyhow::Result<BTreeSet<i64>>;
}

impl SalesAssignments for Database {
    fn team_freelancer_ids(&self, sales_user_id: i64, belongs: bool) -> anyhow::Result<BTreeSet<i64>> {
        self.sales_team_freelancer_ids(sales_user_id, belongs)
    }
}

/// Decides which conversations a staff account may see. Produces predicates
/// only; pagination and grouping belong to the aggregator.
pub struct ConversationRouter<'a, S: SalesAssignments> {
    sales: &'a S,
}

impl<'a, S: SalesAssignments> ConversationRouter<'a, S> {
    pub fn new(sales: &'a S) -> Self {
        Self { sales }
    }

    pub fn route(&self, staff_user_id: i64, role: StaffRole, job_filter: JobFilter) -> ChatResult<Conjunction> {
        let mut conjunction = Conjunction::new();

        if role == StaffRole::Sales {
            // Unassigned freelancers stay visible to every sales rep.
            let hidden_freelancer_ids = self.sales.team_freelancer_ids(staff_user_id, false)?;
            conjunction.push(Predicate::BySalesOwnership { hidden_freelancer_ids });
        }

        match (job_filter, role) {
            (JobFilter::WithJob, StaffRole::Admin) => {
                conjunction.push(Predicate::ByJobAssignment { admin_id: staff_user_id });
            }
            (JobFilter::WithJob, StaffRole::Sales) => conjunction.push(Predicate::HasJob),
            (JobFilter::WithoutJob, _) => conjunction.push(Predicate::WithoutJob),
            (JobFilter::Any, _) => {}
        }

        debug!(
            "Routed staff {} ({:?}, {:?}) to {} predicate(s)",
            staff_user_id,
            role,
            job_filter,
            conjunction.predicates().len()
        );
        Ok(conjunction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Teams(HashMap<i64, i64>);

    impl SalesAssignments for Teams {
        fn team_freelancer_ids(&self, sales_user_id: i64, belongs: bool) -> anyhow::Result<BTreeSet<i64>> {
            Ok(self
                .0
                .iter()
                .filter(|&(_, rep)| (*rep == sales_user_id) == belongs)
                .map(|(freelancer, _)| *freelancer)
                .collect())
        }
    }

    fn teams() -> Teams {
        Teams(HashMap::from([(100, 1), (101, 2), (102, 3)]))
    }

    #[test]
    fn sales_hides_other_reps_freelancers() {
        let teams = teams();
        let conj = ConversationRouter::new(&teams).route(1, StaffRole::Sales, JobFilter::Any).unwrap();
        assert_eq!(
            conj.predicates(),
            &[Predicate::BySalesOwnership {
                hidden_freelancer_ids: BTreeSet::from([101, 102])
            }]
        );
    }

    #[test]
    fn admin_with_job_needs_assignment() {
        let teams = teams();
        let conj = ConversationRouter::new(&teams).route(9, StaffRole::Admin, JobFilter::WithJob).unwrap();
        assert_eq!(conj.predicates(), &[Predicate::ByJobAssignment { admin_id: 9 }]);
    }

    #[test]
    fn sales_with_job_only_needs_a_job() {
        let teams = teams();
        let conj = ConversationRouter::new(&teams).route(1, StaffRole::Sales, JobFilter::WithJob).unwrap();
        assert_eq!(conj.predicates().len(), 2);
        assert_eq!(conj.predicates()[1], Predicate::HasJob);
    }

    #[test]
    fn without_job_applies_to_every_role() {
        let teams = teams();
        let router = ConversationRouter::new(&teams);
        let admin = router.route(9, StaffRole::Admin, JobFilter::WithoutJob).unwrap();
        assert_eq!(admin.predicates(), &[Predicate::WithoutJob]);
        let sales = router.route(1, StaffRole::Sales, JobFilter::WithoutJob).unwrap();
        assert_eq!(sales.predicates().last(), Some(&Predicate::WithoutJob));
    }

    #[test]
    fn admin_any_is_unrestricted() {
        let teams = teams();
        let conj = ConversationRouter::new(&teams).route(9, StaffRole::Admin, JobFilter::Any).unwrap();
        assert!(conj.is_empty());
    }
}
