use std::{cell::RefCell, rc::Rc};

use derive_ex::derive_ex;
use indexmap::IndexMap;

use crate::computed::{ComputedOptions, ComputedValue};
use crate::core::{ActionContext, SignalContext};
use crate::intercept::{notify_listeners, run_interceptors, Handlers};
use crate::spy::{is_spy_enabled, spy_report_end, spy_report_start, SpyEvent};
use crate::value::{Enhancer, ObservableValue, ValueOptions};
use crate::{batch, Subscription};


/// A change about to be applied to an observable object. Interceptors
/// may substitute the value or cancel the change by returning `None`.
#[derive(Debug)]
pub enum ObjectWillChange<T> {
    Add { key: String, new_value: T },
    Update { key: String, new_value: T },
    Remove { key: String },
}

/// A committed change on an observable object, handed to listeners.
///
/// `Remove` carries the old value only for data properties; a removed
/// computed property has no stored value to report.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectChange<T> {
    Add {
        key: String,
        new_value: T,
    },
    Update {
        key: String,
        new_value: T,
        old_value: T,
    },
    Remove {
        key: String,
        old_value: Option<T>,
    },
}

/// Construction options for [`ObservableObject`].
pub struct ObjectOptions<T> {
    pub(crate) name: Option<String>,
    pub(crate) enhancer: Option<Enhancer<T>>,
}

impl<T> ObjectOptions<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            enhancer: None,
        }
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    /// Enhancer applied to every value stored through this object.
    pub fn enhancer(mut self, enhancer: Enhancer<T>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }
}

impl<T> Default for ObjectOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum Property<T: 'static> {
    Value(ObservableValue<T>),
    Computed(ComputedValue<T>),
}

impl<T: 'static> Clone for Property<T> {
    fn clone(&self) -> Self {
        match self {
            Property::Value(v) => Property::Value(v.clone()),
            Property::Computed(c) => Property::Computed(c.clone()),
        }
    }
}

/// A string-keyed bag of per-key observables: the administration of one
/// observable host object.
///
/// Each data key owns an [`ObservableValue`]; each computed key owns a
/// [`ComputedValue`] whose derivation receives the owning object.
/// Every key is tracked independently, so a derivation reading `"x"`
/// does not re-run when `"y"` changes.
#[derive_ex(Clone, bound())]
pub struct ObservableObject<T: 'static>(Rc<ObjectAdmin<T>>);

pub(crate) struct ObjectAdmin<T: 'static> {
    name: String,
    values: RefCell<IndexMap<String, Property<T>>>,
    keys: RefCell<Option<ObservableValue<Vec<String>>>>,
    #[allow(clippy::type_complexity)]
    interceptors: Handlers<dyn Fn(ObjectWillChange<T>) -> Option<ObjectWillChange<T>>>,
    listeners: Handlers<dyn Fn(&ObjectChange<T>)>,
    default_enhancer: Option<Enhancer<T>>,
}

impl<T: Clone + PartialEq + 'static> ObservableObject<T> {
    pub fn new() -> Self {
        Self::with_options(ObjectOptions::new())
    }

    pub fn with_options(options: ObjectOptions<T>) -> Self {
        let name = options
            .name
            .unwrap_or_else(|| format!("ObservableObject@{}", crate::core::next_node_id()));
        ObservableObject(Rc::new(ObjectAdmin {
            name,
            values: RefCell::new(IndexMap::new()),
            keys: RefCell::new(None),
            interceptors: Handlers::new(),
            listeners: Handlers::new(),
            default_enhancer: options.enhancer,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Reads a property, tracking it as a dependency. Absent (or
    /// removed) keys read as `None` without tracking.
    pub fn read(&self, sc: &mut SignalContext, key: &str) -> Option<T> {
        let prop = self.0.values.borrow().get(key).cloned();
        match prop {
            None => None,
            Some(Property::Value(value)) => Some(value.get(sc)),
            Some(Property::Computed(computed)) => Some(computed.get(sc)),
        }
    }

    /// Writes an existing property. Computed properties forward to their
    /// setter; data properties run the interceptor chain, the value
    /// policies, and notify listeners and the spy on a committed change.
    pub fn write(&self, key: &str, value: T, ac: &mut ActionContext) {
        let prop = self.0.values.borrow().get(key).cloned();
        match prop {
            None => panic!(
                "no observable property `{key}` on `{}`; add it before writing",
                self.0.name
            ),
            Some(Property::Computed(computed)) => computed.set(value, ac),
            Some(Property::Value(observable)) => {
                let admin = &self.0;
                batch(ac, |_ac| {
                    let change = run_interceptors(
                        &admin.interceptors,
                        ObjectWillChange::Update {
                            key: key.to_string(),
                            new_value: value,
                        },
                    );
                    let new_value = match change {
                        None => return,
                        Some(ObjectWillChange::Update { new_value, .. }) => new_value,
                        Some(_) => panic!(
                            "object interceptor replaced an update on `{}` with a different kind of change",
                            admin.name
                        ),
                    };
                    let Some(prepared) = observable.node().prepare_new_value(new_value) else {
                        return;
                    };
                    let need_record = !admin.listeners.is_empty() || is_spy_enabled();
                    if need_record {
                        spy_report_start(SpyEvent::Update {
                            object: admin.name.clone(),
                            key: Some(key.to_string()),
                        });
                    }
                    let old_value = observable.node().assign_and_propagate(prepared);
                    if need_record {
                        let change = ObjectChange::Update {
                            key: key.to_string(),
                            new_value: observable.get_untracked(),
                            old_value,
                        };
                        notify_listeners(&admin.listeners, &change);
                        spy_report_end();
                    }
                });
            }
        }
    }

    /// Installs a new observable data property. Panics if the key exists.
    pub fn add(&self, key: impl Into<String>, value: T, ac: &mut ActionContext) {
        let key = key.into();
        let admin = &self.0;
        if admin.values.borrow().contains_key(&key) {
            panic!("property `{key}` already exists on `{}`", admin.name);
        }
        let change = run_interceptors(
            &admin.interceptors,
            ObjectWillChange::Add {
                key,
                new_value: value,
            },
        );
        let (key, new_value) = match change {
            None => return,
            Some(ObjectWillChange::Add { key, new_value }) => (key, new_value),
            Some(_) => panic!(
                "object interceptor replaced an add on `{}` with a different kind of change",
                admin.name
            ),
        };
        batch(ac, |ac| {
            let mut options = ValueOptions::new().name(format!("{}.{}", admin.name, key));
            if let Some(enhancer) = &admin.default_enhancer {
                options = options.enhancer(enhancer.clone());
            }
            let observable = ObservableValue::with_options(new_value, options);
            let stored = observable.get_untracked();
            admin
                .values
                .borrow_mut()
                .insert(key.clone(), Property::Value(observable));
            self.push_key(&key, ac);

            let spying = is_spy_enabled();
            if spying {
                spy_report_start(SpyEvent::Add {
                    object: admin.name.clone(),
                    key: key.clone(),
                });
            }
            notify_listeners(
                &admin.listeners,
                &ObjectChange::Add {
                    key,
                    new_value: stored,
                },
            );
            if spying {
                spy_report_end();
            }
        });
    }

    /// Installs a computed property whose derivation receives the owning
    /// object, so it can read sibling properties reactively.
    pub fn add_computed(
        &self,
        key: impl Into<String>,
        derive: impl Fn(&ObservableObject<T>, &mut SignalContext) -> T + 'static,
    ) {
        self.add_computed_with_options(key, ComputedOptions::new(), derive);
    }

    pub fn add_computed_with_options(
        &self,
        key: impl Into<String>,
        options: ComputedOptions<T>,
        derive: impl Fn(&ObservableObject<T>, &mut SignalContext) -> T + 'static,
    ) {
        let key = key.into();
        let admin = &self.0;
        if admin.values.borrow().contains_key(&key) {
            panic!("property `{key}` already exists on `{}`", admin.name);
        }
        // The derivation must not keep the object alive through its own
        // property, so it holds the administration weakly.
        let weak = Rc::downgrade(admin);
        let computed = ComputedValue::with_options(
            move |sc| {
                let admin = weak
                    .upgrade()
                    .expect("observable object dropped while its computed property is in use");
                derive(&ObservableObject(admin), sc)
            },
            options.name(format!("{}.{}", admin.name, key)),
        );
        admin
            .values
            .borrow_mut()
            .insert(key, Property::Computed(computed));
    }

    /// Removes a property. A no-op for absent keys; interceptors may
    /// cancel. Observers of the removed property re-run once and rebind.
    pub fn remove(&self, key: &str, ac: &mut ActionContext) {
        let admin = &self.0;
        if !admin.values.borrow().contains_key(key) {
            return;
        }
        let change = run_interceptors(
            &admin.interceptors,
            ObjectWillChange::Remove {
                key: key.to_string(),
            },
        );
        match change {
            None => return,
            Some(ObjectWillChange::Remove { .. }) => {}
            Some(_) => panic!(
                "object interceptor replaced a remove on `{}` with a different kind of change",
                admin.name
            ),
        }
        batch(ac, |ac| {
            let Some(prop) = admin.values.borrow_mut().shift_remove(key) else {
                return;
            };
            self.drop_key(key, ac);

            let spying = is_spy_enabled();
            if spying {
                spy_report_start(SpyEvent::Remove {
                    object: admin.name.clone(),
                    key: key.to_string(),
                });
            }
            let old_value = match &prop {
                Property::Value(value) => {
                    let old = value.get_untracked();
                    value.node().invalidate_observers();
                    Some(old)
                }
                Property::Computed(computed) => {
                    computed.invalidate_observers();
                    None
                }
            };
            notify_listeners(
                &admin.listeners,
                &ObjectChange::Remove {
                    key: key.to_string(),
                    old_value,
                },
            );
            if spying {
                spy_report_end();
            }
        });
    }

    /// The object's data-property keys, in insertion order, as a tracked
    /// read. The underlying observable sequence is materialised lazily on
    /// the first call and kept current by `add` and `remove`.
    pub fn keys(&self, sc: &mut SignalContext) -> Vec<String> {
        self.ensure_keys().get(sc)
    }

    /// Registers a listener for committed `add`/`update`/`remove`
    /// changes.
    ///
    /// Observable objects cannot replay their state as a change stream,
    /// so `fire_immediately` is rejected.
    pub fn observe(
        &self,
        listener: impl Fn(&ObjectChange<T>) + 'static,
        fire_immediately: bool,
    ) -> Subscription {
        assert!(
            !fire_immediately,
            "`observe` on an observable object cannot fire immediately"
        );
        let key = self.0.listeners.add(Rc::new(listener));
        Subscription::from_rc_fn(self.0.clone(), move |admin| admin.listeners.remove(key))
    }

    /// Registers an interceptor running before every change, in
    /// insertion order; the first returning `None` cancels.
    pub fn intercept(
        &self,
        handler: impl Fn(ObjectWillChange<T>) -> Option<ObjectWillChange<T>> + 'static,
    ) -> Subscription {
        let key = self.0.interceptors.add(Rc::new(handler));
        Subscription::from_rc_fn(self.0.clone(), move |admin| admin.interceptors.remove(key))
    }

    fn ensure_keys(&self) -> ObservableValue<Vec<String>> {
        let admin = &self.0;
        let mut slot = admin.keys.borrow_mut();
        slot.get_or_insert_with(|| {
            let current: Vec<String> = admin
                .values
                .borrow()
                .iter()
                .filter(|(_, prop)| matches!(prop, Property::Value(_)))
                .map(|(key, _)| key.clone())
                .collect();
            ObservableValue::with_options(
                current,
                ValueOptions::new().name(format!("{}.keys()", admin.name)),
            )
        })
        .clone()
    }

    fn push_key(&self, key: &str, ac: &mut ActionContext) {
        let keys = self.0.keys.borrow().clone();
        if let Some(keys) = keys {
            let mut current = keys.get_untracked();
            current.push(key.to_string());
            keys.set(current, ac);
        }
    }

    fn drop_key(&self, key: &str, ac: &mut ActionContext) {
        let keys = self.0.keys.borrow().clone();
        if let Some(keys) = keys {
            let mut current = keys.get_untracked();
            current.retain(|k| k != key);
            keys.set(current, ac);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Default for ObservableObject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for ObservableObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableObject")
            .field("name", &self.0.name)
            .field("keys", &self.0.values.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}
