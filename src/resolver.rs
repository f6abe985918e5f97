//! # resolver
//!
//! picks the scheduler a new activation runs on
//!

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::scheduler::Scheduler;

/// where a new activation is being started from
#[derive(Clone)]
pub struct CallSite {
    owner: &'static str,
    caller: Option<Arc<dyn Scheduler>>,
}

impl CallSite {
    /// a call from outside of any activation
    pub fn detached(owner: &'static str) -> Self {
        CallSite {
            owner,
            caller: None,
        }
    }

    /// a call issued by an activation running on `caller`
    pub fn nested(owner: &'static str, caller: Arc<dyn Scheduler>) -> Self {
        CallSite {
            owner,
            caller: Some(caller),
        }
    }

    /// the declaring scope of the called procedure
    #[inline]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// the scheduler of the calling activation, if any
    #[inline]
    pub fn caller(&self) -> Option<&Arc<dyn Scheduler>> {
        self.caller.as_ref()
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("owner", &self.owner)
            .field("caller", &self.caller)
            .finish()
    }
}

/// a strategy for choosing a scheduler
pub trait SchedulerResolver: Send + Sync {
    /// higher is asked first
    fn priority(&self) -> i32;

    /// a scheduler for `site`, or `None` to defer to the next resolver
    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>>;
}

impl<R: SchedulerResolver + ?Sized> SchedulerResolver for Box<R> {
    fn priority(&self) -> i32 {
        (**self).priority()
    }

    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        (**self).resolve(site)
    }
}

/// nested calls run on their caller's scheduler
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritScheduler;

impl SchedulerResolver for InheritScheduler {
    fn priority(&self) -> i32 {
        100
    }

    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        site.caller().cloned()
    }
}

/// resolves by the call site's declaring scope
pub struct ScopeResolver {
    priority: i32,
    scopes: HashMap<&'static str, Arc<dyn Scheduler>>,
}

impl ScopeResolver {
    /// an empty resolver asked at `priority`
    pub fn new(priority: i32) -> Self {
        ScopeResolver {
            priority,
            scopes: HashMap::new(),
        }
    }

    /// run procedures declared in `owner` on `scheduler`
    pub fn bind(mut self, owner: &'static str, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scopes.insert(owner, scheduler);
        self
    }
}

impl SchedulerResolver for ScopeResolver {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        self.scopes.get(site.owner()).cloned()
    }
}

/// resolvers ordered by descending priority,
/// equal priorities keep registration order
pub struct ResolverChain {
    resolvers: Vec<Box<dyn SchedulerResolver>>,
}

impl ResolverChain {
    /// a chain with no resolver at all
    pub fn empty() -> Self {
        ResolverChain {
            resolvers: Vec::new(),
        }
    }

    /// register a resolver
    pub fn push<R: SchedulerResolver + 'static>(&mut self, resolver: R) {
        let priority = resolver.priority();
        let at = self
            .resolvers
            .iter()
            .position(|r| r.priority() < priority)
            .unwrap_or(self.resolvers.len());
        self.resolvers.insert(at, Box::new(resolver));
    }

    /// first answer in priority order
    pub fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        self.resolvers.iter().find_map(|r| r.resolve(site))
    }

    /// number of registered resolvers
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// no resolver registered
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl Default for ResolverChain {
    /// the chain with [`InheritScheduler`] registered
    fn default() -> Self {
        let mut chain = Self::empty();
        chain.push(InheritScheduler);
        chain
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.priority()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::Inline;
    use crate::scheduler::SimpleScheduler;

    fn scheduler(name: &'static str) -> Arc<dyn Scheduler> {
        Arc::new(SimpleScheduler::new(Inline).named(name))
    }

    fn same(a: &Arc<dyn Scheduler>, b: &Arc<dyn Scheduler>) -> bool {
        std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
    }

    #[test]
    fn test_inherit_caller() {
        let s = scheduler("caller");
        let chain = ResolverChain::default();
        let got = chain.resolve(&CallSite::nested("inner", s.clone())).unwrap();
        assert!(same(&got, &s));
        assert!(chain.resolve(&CallSite::detached("top")).is_none());
    }

    #[test]
    fn test_priority_order() {
        let caller = scheduler("caller");
        let low = scheduler("low");
        let high = scheduler("high");

        let mut chain = ResolverChain::default();
        chain.push(ScopeResolver::new(10).bind("svc", low.clone()));
        let got = chain.resolve(&CallSite::nested("svc", caller.clone())).unwrap();
        assert!(same(&got, &caller));
        // below the inherited resolver, only used for detached calls
        let got = chain.resolve(&CallSite::detached("svc")).unwrap();
        assert!(same(&got, &low));

        chain.push(ScopeResolver::new(200).bind("svc", high.clone()));
        let got = chain.resolve(&CallSite::nested("svc", caller.clone())).unwrap();
        assert!(same(&got, &high));
        let got = chain.resolve(&CallSite::nested("other", caller.clone())).unwrap();
        assert!(same(&got, &caller));
        assert_eq!(format!("{chain:?}"), "[200, 100, 10]");
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let first = scheduler("first");
        let second = scheduler("second");
        let mut chain = ResolverChain::empty();
        chain.push(ScopeResolver::new(5).bind("x", first.clone()));
        chain.push(ScopeResolver::new(5).bind("x", second));
        let got = chain.resolve(&CallSite::detached("x")).unwrap();
        assert!(same(&got, &first));
    }
}
