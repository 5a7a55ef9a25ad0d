use std::collections::BTreeSet;

use super::model::EntityKey;

// ---------------------------------------------------------------------------
// Entity selection: which targets a command looks at
// ---------------------------------------------------------------------------

/// Restriction on the Kepler ids a command validates. An empty set means
/// "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    kepler_ids: BTreeSet<i32>,
}

impl EntityFilter {
    pub fn new(kepler_ids: impl IntoIterator<Item = i32>) -> Self {
        EntityFilter {
            kepler_ids: kepler_ids.into_iter().collect(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.kepler_ids.is_empty()
    }

    pub fn accepts_kepler_id(&self, kepler_id: i32) -> bool {
        !self.is_active() || self.kepler_ids.contains(&kepler_id)
    }

    /// Entities without a Kepler id (pixels, collateral, channel) always
    /// pass.
    pub fn accepts(&self, entity: &EntityKey) -> bool {
        match entity {
            EntityKey::Target(id) | EntityKey::TargetPixel(id, _) | EntityKey::Planet(id, _) => {
                self.accepts_kepler_id(*id)
            }
            EntityKey::Pixel(_) | EntityKey::Collateral(..) | EntityKey::Channel => true,
        }
    }
}

/// Indices of `items` that pass `filter`, then every `(skip_count + 1)`th of
/// those, starting with the first.
pub fn sampled_indices<'a, I>(items: I, filter: &EntityFilter, skip_count: usize) -> Vec<usize>
where
    I: IntoIterator<Item = &'a EntityKey>,
{
    items
        .into_iter()
        .enumerate()
        .filter(|(_, entity)| filter.accepts(entity))
        .map(|(i, _)| i)
        .step_by(skip_count + 1)
        .collect()
}

/// Convenience over [`sampled_indices`] returning the entities themselves.
pub fn sample<'a>(
    entities: &'a [EntityKey],
    filter: &EntityFilter,
    skip_count: usize,
) -> Vec<&'a EntityKey> {
    sampled_indices(entities, filter, skip_count)
        .into_iter()
        .map(|i| &entities[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Pixel;

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = EntityFilter::default();
        assert!(filter.accepts(&EntityKey::Target(1)));
        assert!(filter.accepts(&EntityKey::Channel));
    }

    #[test]
    fn id_filter_only_constrains_target_entities() {
        let filter = EntityFilter::new([7]);
        assert!(filter.accepts(&EntityKey::Target(7)));
        assert!(!filter.accepts(&EntityKey::Target(8)));
        assert!(!filter.accepts(&EntityKey::Planet(8, 1)));
        assert!(filter.accepts(&EntityKey::Pixel(Pixel::new(1, 2))));
    }

    #[test]
    fn skip_count_samples_after_filtering() {
        let entities: Vec<EntityKey> = (1..=7).map(EntityKey::Target).collect();
        let all = EntityFilter::default();
        assert_eq!(sampled_indices(&entities, &all, 0), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(sampled_indices(&entities, &all, 2), vec![0, 3, 6]);

        let odd = EntityFilter::new([1, 3, 5, 7]);
        let picked = sample(&entities, &odd, 1);
        assert_eq!(picked, vec![&EntityKey::Target(1), &EntityKey::Target(5)]);
    }
}
