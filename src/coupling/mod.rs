//! # Couplings
//!
//! A coupling synchronizes one relation with an external endpoint, but only
//! when asked to: [`Coupling::get`] pulls from the source function into the
//! relation, [`Coupling::set`] pushes the relation value to the target
//! function. Couplings are stored in the relation's meta relations under the
//! reserved [`COUPLINGS`] descriptor; one relation may carry several.
//!
//! Pulls and pushes run under the host lock. Couplings between two hosts
//! lock them in call order, so cycles of couplings across hosts must not be
//! driven from several threads at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::model::{
    AnyRelationType, Modifiers, Relatable, Relation, RelationType, RelationValue, Relations,
    TypeHandle, WeakRelations,
};
use crate::{Error, Result};

static NEXT_COUPLING_ID: AtomicU64 = AtomicU64::new(1);

/// The couplings of a relation.
pub static COUPLINGS: LazyLock<RelationType<CouplingSet>> = LazyLock::new(|| {
    RelationType::builder("COUPLINGS")
        .modifiers(Modifiers::PRIVATE | Modifiers::TRANSIENT)
        .default_value(CouplingSet::default())
        .build()
});

/// Receives relation values pushed by [`Coupling::set`].
pub type UpdateTarget<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Supplies relation values pulled by [`Coupling::get`].
pub type QuerySource<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouplingId(pub u64);

/// Untyped access for batch operations over a relation's coupling set.
trait ErasedCoupling: Send + Sync {
    fn id(&self) -> CouplingId;
    fn pull(&self) -> Result<()>;
    fn push(&self) -> Result<()>;
    fn detach(&self) -> Result<()>;
}

/// Couplings stored on one relation.
#[derive(Clone, Default)]
pub struct CouplingSet {
    entries: SmallVec<[Arc<dyn ErasedCoupling>; 1]>,
}

impl CouplingSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CouplingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|c| c.id()))
            .finish()
    }
}

// ============================================================================
// Coupling<T>
// ============================================================================

/// A manually triggered, bidirectional link between a relation and an
/// external getter/setter pair.
pub struct Coupling<T> {
    inner: Arc<CouplingInner<T>>,
}

impl<T> Clone for Coupling<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CouplingInner<T> {
    id: CouplingId,
    host: WeakRelations,
    rtype: RelationType<T>,
    update_target: Mutex<Option<UpdateTarget<T>>>,
    query_source: Mutex<Option<QuerySource<T>>>,
    removed: AtomicBool,
    /// Set once the coupling is stored on its relation.
    attached: AtomicBool,
}

impl<T: RelationValue> Coupling<T> {
    /// Couple the relation of `rtype` on `host` with both endpoints.
    pub fn couple(
        host: &Relations,
        rtype: &RelationType<T>,
        update_target: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
        query_source: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::from_parts(host, rtype, Some(Arc::new(update_target)), Some(Arc::new(query_source)))
    }

    /// Couple with a target only; `get` returns the current value.
    pub fn couple_target(
        host: &Relations,
        rtype: &RelationType<T>,
        update_target: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::from_parts(host, rtype, Some(Arc::new(update_target)), None)
    }

    /// Couple with a source only; `set` does nothing.
    pub fn couple_source(
        host: &Relations,
        rtype: &RelationType<T>,
        query_source: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::from_parts(host, rtype, None, Some(Arc::new(query_source)))
    }

    /// Couple with a shared value cell in both directions.
    pub fn couple_value(host: &Relations, rtype: &RelationType<T>, cell: Arc<RwLock<T>>) -> Result<Self> {
        let target = Arc::clone(&cell);
        Self::couple(
            host,
            rtype,
            move |value: &T| {
                *target.write() = value.clone();
                Ok(())
            },
            move || Ok(cell.read().clone()),
        )
    }

    /// Fails with `InvalidArgument` if both functions are absent. A missing
    /// relation is initialized when its type has an initial or default value;
    /// otherwise the coupling attaches once the first `get` creates it.
    pub fn from_parts(
        host: &Relations,
        rtype: &RelationType<T>,
        update_target: Option<UpdateTarget<T>>,
        query_source: Option<QuerySource<T>>,
    ) -> Result<Self> {
        if update_target.is_none() && query_source.is_none() {
            return Err(Error::InvalidArgument(format!(
                "coupling of {} needs a target or a source",
                rtype.name()
            )));
        }

        let _guard = host.lock();
        let relation = match host.get_relation(rtype) {
            Some(relation) => Some(relation),
            None if rtype.has_initial_value() => Some(host.init(rtype)?),
            None => None,
        };

        let coupling = Self {
            inner: Arc::new(CouplingInner {
                id: CouplingId(NEXT_COUPLING_ID.fetch_add(1, Ordering::Relaxed)),
                host: host.downgrade(),
                rtype: rtype.clone(),
                update_target: Mutex::new(update_target),
                query_source: Mutex::new(query_source),
                removed: AtomicBool::new(false),
                attached: AtomicBool::new(false),
            }),
        };
        match relation {
            Some(relation) => coupling.attach(&relation),
            None => debug!(relation = rtype.name(), coupling = coupling.inner.id.0, "coupling pending"),
        }
        Ok(coupling)
    }

    /// Attach a pending coupling once its relation exists.
    fn attach_pending(&self, host: &Relations) {
        if let Some(relation) = host.get_relation(&self.inner.rtype) {
            self.attach(&relation);
        }
    }

    /// Record this coupling in the relation's meta relations.
    fn attach(&self, relation: &Relation) {
        if self.is_removed() || self.inner.attached.swap(true, Ordering::AcqRel) {
            return;
        }
        let meta = relation.relations();
        let mut set = meta.get(&*COUPLINGS).unwrap_or_default();
        set.entries.push(Arc::new(self.clone()));
        meta.put_silent(&*COUPLINGS, set);
        debug!(relation = self.inner.rtype.name(), coupling = self.inner.id.0, "coupling added");
    }

    pub fn id(&self) -> CouplingId {
        self.inner.id
    }

    pub fn relation_type(&self) -> &RelationType<T> {
        &self.inner.rtype
    }

    pub fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::Acquire)
    }

    fn host(&self) -> Result<Relations> {
        self.inner.host.upgrade().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "host of coupled relation {} was dropped",
                self.inner.rtype.name()
            ))
        })
    }

    /// Pull from the source into the relation and return the new value.
    /// Without a source, returns the current value unchanged.
    pub fn get(&self) -> Result<Option<T>> {
        let host = self.host()?;
        let _guard = host.lock();
        let source = self.inner.query_source.lock().clone();
        match source {
            Some(query) => {
                let value = query()?;
                let stored = host.set(&self.inner.rtype, value.clone());
                self.attach_pending(&host);
                stored?;
                Ok(Some(value))
            }
            None => Ok(host.get(&self.inner.rtype)),
        }
    }

    /// Push the current relation value to the target, if there is one.
    pub fn set(&self) -> Result<()> {
        let host = self.host()?;
        let _guard = host.lock();
        self.attach_pending(&host);
        let target = self.inner.update_target.lock().clone();
        if let (Some(update), Some(value)) = (target, host.get(&self.inner.rtype)) {
            update(&value)?;
        }
        Ok(())
    }

    /// Detach both endpoints and drop this coupling from its relation.
    /// Host `get`/`set` keep working without touching the endpoints.
    pub fn remove(&self) -> Result<()> {
        self.inner.update_target.lock().take();
        self.inner.query_source.lock().take();
        self.inner.removed.store(true, Ordering::Release);

        if let Some(host) = self.inner.host.upgrade() {
            let _guard = host.lock();
            if let Some(relation) = host.get_relation(&self.inner.rtype) {
                let meta = relation.relations();
                let mut set = meta.get(&*COUPLINGS).unwrap_or_default();
                set.entries.retain(|c| c.id() != self.inner.id);
                meta.put_silent(&*COUPLINGS, set);
            }
        }
        debug!(relation = self.inner.rtype.name(), coupling = self.inner.id.0, "coupling removed");
        Ok(())
    }
}

impl<T: RelationValue> ErasedCoupling for Coupling<T> {
    fn id(&self) -> CouplingId {
        self.inner.id
    }

    fn pull(&self) -> Result<()> {
        self.get().map(|_| ())
    }

    fn push(&self) -> Result<()> {
        self.set()
    }

    fn detach(&self) -> Result<()> {
        self.remove()
    }
}

impl<T> fmt::Debug for Coupling<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coupling")
            .field("id", &self.inner.id)
            .field("relation", &self.inner.rtype.name())
            .field("removed", &self.inner.removed.load(Ordering::Acquire))
            .finish()
    }
}

// ============================================================================
// Batch operations
// ============================================================================

/// Number of couplings on the relation of `rtype`.
pub fn coupling_count(host: &Relations, rtype: &impl TypeHandle) -> usize {
    host.get_relation(rtype)
        .and_then(|relation| relation.meta_if_present().and_then(|meta| meta.get(&*COUPLINGS)))
        .map_or(0, |set| set.len())
}

/// Pull every coupling of the given relations.
pub fn get_all(host: &Relations, types: &[AnyRelationType]) -> Result<()> {
    for_each_coupling(host, types, |c| c.pull())
}

/// Push every coupling of the given relations.
pub fn set_all(host: &Relations, types: &[AnyRelationType]) -> Result<()> {
    for_each_coupling(host, types, |c| c.push())
}

/// Remove every coupling of the given relations.
pub fn remove_all(host: &Relations, types: &[AnyRelationType]) -> Result<()> {
    for_each_coupling(host, types, |c| c.detach())
}

fn for_each_coupling(
    host: &Relations,
    types: &[AnyRelationType],
    mut f: impl FnMut(&dyn ErasedCoupling) -> Result<()>,
) -> Result<()> {
    let _guard = host.lock();
    for rtype in types {
        let Some(relation) = host.get_relation(rtype) else {
            continue;
        };
        for coupling in couplings_of(&relation).entries.iter() {
            f(coupling.as_ref())?;
        }
    }
    Ok(())
}

fn couplings_of(relation: &Relation) -> CouplingSet {
    relation
        .meta_if_present()
        .and_then(|meta| meta.get(&*COUPLINGS))
        .unwrap_or_default()
}
