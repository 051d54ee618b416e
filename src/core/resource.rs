use super::engine::{Engine, EngineError, ResourceInfo, ViolationInfo};
use super::profile::ResourceProfile;
use super::{ActivityId, ResourceId, Time};
use std::cell::RefCell;

/// Where conflict sets and violations of a resource are computed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ResourceMode {
    /// Ask the engine for every query.
    Engine,
    /// Rebuild a [`ResourceProfile`] locally from activity bounds.
    #[default]
    Local,
}

/// A capacity resource as seen by the solvers.
pub trait Resource: std::fmt::Debug {
    /// Static description of the resource.
    fn info(&self) -> &ResourceInfo;

    /// Id of the resource.
    fn id(&self) -> ResourceId {
        self.info().id
    }

    /// Name of the resource.
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Capacity of the resource.
    fn capacity(&self) -> i64 {
        self.info().capacity
    }

    /// The most violated time and its level, if the resource is over capacity anywhere.
    ///
    /// # Errors
    /// - If the engine doesn't know the resource.
    fn max_violation(&self, engine: &dyn Engine) -> Result<Option<ViolationInfo>, EngineError>;

    /// Orderable `(pred, succ)` pairs among the activities covering `time`.
    ///
    /// # Errors
    /// - If the engine doesn't know the resource.
    fn conflict_set(
        &self,
        engine: &dyn Engine,
        time: Time,
    ) -> Result<Vec<(ActivityId, ActivityId)>, EngineError>;
}

/// Resource delegating every query to the engine.
#[derive(Clone, Debug)]
pub struct EngineResource {
    info: ResourceInfo,
}

impl EngineResource {
    #[must_use]
    pub const fn new(info: ResourceInfo) -> Self {
        Self { info }
    }
}

impl Resource for EngineResource {
    fn info(&self) -> &ResourceInfo {
        &self.info
    }

    fn max_violation(&self, engine: &dyn Engine) -> Result<Option<ViolationInfo>, EngineError> {
        engine.resource_max_violation(self.info.id)
    }

    fn conflict_set(
        &self,
        engine: &dyn Engine,
        time: Time,
    ) -> Result<Vec<(ActivityId, ActivityId)>, EngineError> {
        engine.resource_conflict_set(self.info.id, time)
    }
}

/// Resource computing its own profile from activity bounds.
///
/// The profile is cached and rebuilt only when the engine version moves.
#[derive(Debug)]
pub struct ProfileResource {
    info: ResourceInfo,
    cache: RefCell<Option<(u64, ResourceProfile)>>,
}

impl ProfileResource {
    #[must_use]
    pub const fn new(info: ResourceInfo) -> Self {
        Self {
            info,
            cache: RefCell::new(None),
        }
    }

    /// Current profile, rebuilt if bounds changed since the last query.
    ///
    /// # Errors
    /// - If the engine doesn't know the resource or one of its activities.
    pub fn profile(&self, engine: &dyn Engine) -> Result<ResourceProfile, EngineError> {
        let version = engine.version();
        if let Some((cached, profile)) = self.cache.borrow().as_ref() {
            if *cached == version {
                return Ok(profile.clone());
            }
        }

        let usages = engine.resource_activities(self.info.id)?;
        let mut current = Vec::with_capacity(usages.len());
        for usage in usages {
            current.push((usage, engine.activity_bounds(usage.activity)?));
        }
        let profile = ResourceProfile::build(self.info.capacity, current);

        *self.cache.borrow_mut() = Some((version, profile.clone()));
        Ok(profile)
    }
}

impl Resource for ProfileResource {
    fn info(&self) -> &ResourceInfo {
        &self.info
    }

    fn max_violation(&self, engine: &dyn Engine) -> Result<Option<ViolationInfo>, EngineError> {
        Ok(self.profile(engine)?.max_violation())
    }

    fn conflict_set(
        &self,
        engine: &dyn Engine,
        time: Time,
    ) -> Result<Vec<(ActivityId, ActivityId)>, EngineError> {
        Ok(self.profile(engine)?.conflict_set(time))
    }
}

/// Wraps every engine resource in the realization selected by `mode`.
#[must_use]
pub fn make_resources(engine: &dyn Engine, mode: ResourceMode) -> Vec<Box<dyn Resource>> {
    engine
        .resources()
        .into_iter()
        .map(|info| -> Box<dyn Resource> {
            match mode {
                ResourceMode::Engine => Box::new(EngineResource::new(info)),
                ResourceMode::Local => Box::new(ProfileResource::new(info)),
            }
        })
        .collect()
}
