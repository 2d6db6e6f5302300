// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The table of every service known to init.
use crate::error::*;
use crate::service::Service;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Owns the mapping from service name to [`Service`].
///
/// Built once at boot and handed to every component; [`ServiceRegistry::clear`]
/// is the teardown point.
#[derive(Default)]
pub struct ServiceRegistry {
    data: RefCell<RegistryData>,
}

#[derive(Default)]
struct RegistryData {
    /// registration order, used for boot and stop-all
    ordered: Vec<Rc<Service>>,
    by_name: HashMap<String, Rc<Service>>,
}

impl ServiceRegistry {
    ///
    pub fn new() -> Self {
        ServiceRegistry::default()
    }

    /// register a service, names are unique
    pub fn add(&self, service: Service) -> Result<Rc<Service>> {
        let mut data = self.data.borrow_mut();
        if data.by_name.contains_key(service.name()) {
            return Err(Error::Config {
                service: service.name().to_string(),
                reason: "duplicate service name".to_string(),
            });
        }

        let service = Rc::new(service);
        data.by_name
            .insert(service.name().to_string(), service.clone());
        data.ordered.push(service.clone());
        log::debug!("Registered service {}", service.name());
        Ok(service)
    }

    ///
    pub fn get(&self, name: &str) -> Option<Rc<Service>> {
        self.data.borrow().by_name.get(name).cloned()
    }

    /// the service whose current run has this pid
    pub fn find_by_pid(&self, pid: Pid) -> Option<Rc<Service>> {
        if pid.as_raw() <= 0 {
            return None;
        }
        self.data
            .borrow()
            .ordered
            .iter()
            .find(|s| s.pid() == pid.as_raw())
            .cloned()
    }

    /// all services in registration order
    pub fn services(&self) -> Vec<Rc<Service>> {
        self.data.borrow().ordered.clone()
    }

    ///
    pub fn len(&self) -> usize {
        self.data.borrow().ordered.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// drop every record, only at init shutdown
    pub fn clear(&self) {
        let mut data = self.data.borrow_mut();
        data.by_name.clear();
        data.ordered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let reg = ServiceRegistry::new();
        reg.add(Service::new("a", vec![])).unwrap();
        let b = reg.add(Service::new("b", vec![])).unwrap();
        assert!(matches!(
            reg.add(Service::new("a", vec![])),
            Err(Error::Config { .. })
        ));

        b.set_pid(4321);
        assert_eq!(reg.find_by_pid(Pid::from_raw(4321)).unwrap().name(), "b");
        assert!(reg.find_by_pid(Pid::from_raw(-1)).is_none());
        assert!(reg.find_by_pid(Pid::from_raw(1)).is_none());

        let names: Vec<String> = reg.services().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reg.len(), 2);

        reg.clear();
        assert!(reg.is_empty());
        assert!(reg.get("a").is_none());
    }
}
