use std::collections::BTreeMap;

use crate::models::{PriorityClass, SchedulingPolicy, ServiceCategory};

/// Subject code -> scheduling policy. Unmapped codes resolve to the default policy.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    policies: BTreeMap<u32, SchedulingPolicy>,
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::new(builtin_policies())
    }
}

impl PolicyResolver {
    pub fn new(policies: impl IntoIterator<Item = SchedulingPolicy>) -> Self {
        let mut table: BTreeMap<u32, SchedulingPolicy> = policies
            .into_iter()
            .map(|p| (p.subject_code, p))
            .collect();
        table
            .entry(SchedulingPolicy::DEFAULT_SUBJECT)
            .or_insert_with(SchedulingPolicy::default_policy);
        Self { policies: table }
    }

    /// Built-in table with `overrides` replacing entries of the same subject code.
    pub fn with_overrides(overrides: impl IntoIterator<Item = SchedulingPolicy>) -> Self {
        let mut policies: BTreeMap<u32, SchedulingPolicy> = builtin_policies()
            .into_iter()
            .map(|p| (p.subject_code, p))
            .collect();
        for p in overrides {
            policies.insert(p.subject_code, p);
        }
        Self::new(policies.into_values())
    }

    pub fn resolve(&self, subject_code: u32) -> &SchedulingPolicy {
        match self.policies.get(&subject_code) {
            Some(policy) => policy,
            None => {
                tracing::debug!(subject_code, "no scheduling rule for subject, using default");
                &self.policies[&SchedulingPolicy::DEFAULT_SUBJECT]
            }
        }
    }

    /// Number of subject codes with a rule, the default included.
    pub fn count(&self) -> usize {
        self.policies.len()
    }
}

fn policy(
    subject_code: u32,
    min_lead_days: u32,
    max_lead_days: u32,
    priority: PriorityClass,
    category: ServiceCategory,
) -> SchedulingPolicy {
    SchedulingPolicy {
        subject_code,
        min_lead_days,
        max_lead_days,
        priority,
        category,
    }
}

pub fn builtin_policies() -> Vec<SchedulingPolicy> {
    use PriorityClass::*;
    use ServiceCategory::*;

    vec![
        SchedulingPolicy::default_policy(),
        // new installation
        policy(1, 1, 10, Soonest, Installation),
        // address change
        policy(2, 2, 10, MidWindow, Installation),
        // no connection
        policy(3, 0, 3, Soonest, Maintenance),
        // slow connection
        policy(4, 1, 5, Soonest, Maintenance),
        // equipment pickup
        policy(5, 3, 20, LatestInWindow, Maintenance),
        // preventive maintenance
        policy(6, 5, 30, MidWindow, Maintenance),
    ]
}
