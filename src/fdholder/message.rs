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

//! text payload of fd-holder requests: `<service>|<hold|get>|<poll|withoutpoll>`
use std::fmt::{self, Display};
use std::str::FromStr;

/// what the client wants done with its descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdAction {
    Hold,
    Get,
}

impl Display for FdAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdAction::Hold => f.write_str("hold"),
            FdAction::Get => f.write_str("get"),
        }
    }
}

/// one parsed request, descriptors and credentials travel separately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdHolderRequest {
    pub action: FdAction,
    pub service: String,
    pub poll: bool,
}

impl FdHolderRequest {
    ///
    pub fn hold(service: &str, poll: bool) -> Self {
        FdHolderRequest {
            action: FdAction::Hold,
            service: service.to_string(),
            poll,
        }
    }

    ///
    pub fn get(service: &str) -> Self {
        FdHolderRequest {
            action: FdAction::Get,
            service: service.to_string(),
            poll: false,
        }
    }
}

impl Display for FdHolderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let poll = match self.poll {
            true => "poll",
            false => "withoutpoll",
        };
        write!(f, "{}|{}|{}", self.service, self.action, poll)
    }
}

impl FromStr for FdHolderRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim_end_matches('\0').split('|').collect();
        if fields.len() != 3 {
            return Err(format!("Invalid message: {}", s));
        }

        let service = fields[0];
        if service.is_empty() {
            return Err("Invalid message: empty service name".to_string());
        }
        let action = match fields[1] {
            "hold" => FdAction::Hold,
            "get" => FdAction::Get,
            other => return Err(format!("Invalid action: {}", other)),
        };
        let poll = match fields[2] {
            "poll" => true,
            "withoutpoll" => false,
            other => return Err(format!("Invalid poll flag: {}", other)),
        };
        if action == FdAction::Get && poll {
            return Err("Invalid message: get does not poll".to_string());
        }

        Ok(FdHolderRequest {
            action,
            service: service.to_string(),
            poll,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let req: FdHolderRequest = "netd|hold|poll".parse().unwrap();
        assert_eq!(req, FdHolderRequest::hold("netd", true));
        assert_eq!(req.to_string(), "netd|hold|poll");

        let req: FdHolderRequest = "netd|get|withoutpoll".parse().unwrap();
        assert_eq!(req, FdHolderRequest::get("netd"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "netd",
            "netd|hold",
            "|hold|poll",
            "netd|drop|poll",
            "netd|hold|sometimes",
            "netd|get|poll",
            "netd|hold|poll|extra",
        ] {
            assert!(bad.parse::<FdHolderRequest>().is_err(), "{}", bad);
        }
    }
}
