//! Typed `getdata` requests
//!
//! The parameter map of a `getdata` line is validated once here; data
//! sources only ever see a [`GetData`] value.

use std::fmt;

use crate::downsample::{Downsampling, DownsamplingType};
use crate::error::ProtocolError;
use crate::protocol::Request;
use crate::rank::AUTO_RANK;
use crate::time::{parse_time, TimeRange};

/// A validated `getdata` request
#[derive(Debug, Clone, PartialEq)]
pub struct GetDataRequest {
    /// Source name
    pub source: String,
    /// What to fetch
    pub action: GetData,
}

/// What a `getdata` request asks for
#[derive(Debug, Clone, PartialEq)]
pub enum GetData {
    /// Channel catalogue
    Channels,
    /// Rank catalogue
    Ranks,
    /// Measurements
    Data(DataQuery),
}

impl GetData {
    /// Wire name of the action
    pub fn action(&self) -> &'static str {
        match self {
            GetData::Channels => "channels",
            GetData::Ranks => "ranks",
            GetData::Data(_) => "data",
        }
    }
}

impl fmt::Display for GetData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Parameters of a `data` action
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    /// Channel ids in request order; `None` means every channel
    pub channels: Option<Vec<u32>>,
    /// Rank id, [`AUTO_RANK`] for best available
    pub rank: u32,
    /// Inclusive time range
    pub range: TimeRange,
    /// Downsampling applied after rank resolution
    pub downsampling: Downsampling,
}

impl DataQuery {
    /// Query every channel at best available rank
    pub fn new(range: TimeRange) -> Self {
        Self {
            channels: None,
            rank: AUTO_RANK,
            range,
            downsampling: Downsampling::None,
        }
    }

    /// Restrict to channels
    pub fn with_channels(mut self, channels: Vec<u32>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Pin a rank
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// Set downsampling
    pub fn with_downsampling(mut self, downsampling: Downsampling) -> Self {
        self.downsampling = downsampling;
        self
    }
}

impl GetDataRequest {
    /// Validate the parameters of a `getdata` request
    pub fn from_request(request: &Request) -> Result<Self, ProtocolError> {
        let source = request.require("source")?.to_string();
        let action = match request.require("action")?.to_ascii_lowercase().as_str() {
            "channels" => GetData::Channels,
            "ranks" => GetData::Ranks,
            "data" => GetData::Data(parse_data(request)?),
            other => {
                return Err(ProtocolError::UnknownAction {
                    source_name: source,
                    action: other.to_string(),
                })
            }
        };
        Ok(Self { source, action })
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_data(request: &Request) -> Result<DataQuery, ProtocolError> {
    let st = request.require("st")?;
    let et = request.require("et")?;
    let start = parse_time(st).ok_or_else(|| invalid("st", st, "expected j2ksec, yyyyMMddHHmmss[SSS] or now"))?;
    let end = parse_time(et).ok_or_else(|| invalid("et", et, "expected j2ksec, yyyyMMddHHmmss[SSS] or now"))?;
    let range = TimeRange::new(start, end).ok_or_else(|| invalid("et", et, "end before start"))?;

    let channels = match request.get("ch").map(str::trim) {
        None | Some("") => None,
        Some(list) => Some(parse_channels(list)?),
    };

    let rank = match request.get("rk") {
        None => AUTO_RANK,
        Some(rk) => rk
            .trim()
            .parse()
            .map_err(|_| invalid("rk", rk, "expected a rank id"))?,
    };

    let ds = request.get("ds").unwrap_or("");
    let kind: DownsamplingType = ds.parse().map_err(|reason: String| invalid("ds", ds, reason))?;
    let interval = match request.get("dsInt") {
        None => 0,
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| invalid("dsInt", v, "expected a positive integer"))?,
    };
    let downsampling = Downsampling::new(kind, interval)
        .map_err(|reason| invalid("dsInt", request.get("dsInt").unwrap_or(""), reason))?;

    Ok(DataQuery {
        channels,
        rank,
        range,
        downsampling,
    })
}

fn parse_channels(list: &str) -> Result<Vec<u32>, ProtocolError> {
    let mut ids = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: u32 = part
            .parse()
            .map_err(|_| invalid("ch", list, "expected comma-separated channel ids"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<GetDataRequest, ProtocolError> {
        GetDataRequest::from_request(&Request::parse(line).unwrap())
    }

    #[test]
    fn test_catalogue_actions() {
        let req = parse("getdata: source=tilt;action=channels").unwrap();
        assert_eq!(req.source, "tilt");
        assert_eq!(req.action, GetData::Channels);
        assert_eq!(parse("getdata: source=tilt;action=RANKS").unwrap().action, GetData::Ranks);
    }

    #[test]
    fn test_data_defaults() {
        let req = parse("getdata: source=tilt;action=data;st=0;et=100").unwrap();
        let GetData::Data(q) = req.action else {
            panic!("expected data");
        };
        assert_eq!(q.channels, None);
        assert_eq!(q.rank, AUTO_RANK);
        assert_eq!(q.range, TimeRange::new(0.0, 100.0).unwrap());
        assert_eq!(q.downsampling, Downsampling::None);
    }

    #[test]
    fn test_data_full() {
        let req = parse(
            "getdata: source=tilt;action=data;st=20000101120000;et=20000102120000;ch=3,1,3;rk=2;ds=mean;dsInt=600",
        )
        .unwrap();
        let GetData::Data(q) = req.action else {
            panic!("expected data");
        };
        assert_eq!(q.channels, Some(vec![3, 1]));
        assert_eq!(q.rank, 2);
        assert_eq!(q.range, TimeRange::new(0.0, 86_400.0).unwrap());
        assert_eq!(q.downsampling, Downsampling::Mean(600));
    }

    #[test]
    fn test_missing_parameters() {
        assert_eq!(
            parse("getdata: action=data").unwrap_err(),
            ProtocolError::MissingParameter("source")
        );
        assert_eq!(
            parse("getdata: source=x").unwrap_err(),
            ProtocolError::MissingParameter("action")
        );
        assert_eq!(
            parse("getdata: source=x;action=data;st=0").unwrap_err(),
            ProtocolError::MissingParameter("et")
        );
    }

    #[test]
    fn test_invalid_parameters() {
        let bad = [
            "getdata: source=x;action=data;st=abc;et=1",
            "getdata: source=x;action=data;st=10;et=1",
            "getdata: source=x;action=data;st=0;et=1;ch=a",
            "getdata: source=x;action=data;st=0;et=1;rk=-1",
            "getdata: source=x;action=data;st=0;et=1;ds=median",
            "getdata: source=x;action=data;st=0;et=1;ds=MEAN",
            "getdata: source=x;action=data;st=0;et=1;ds=MEAN;dsInt=0",
            "getdata: source=x;action=data;st=0;et=1;ds=DECIMATE;dsInt=1.5",
        ];
        for line in bad {
            assert!(
                matches!(parse(line), Err(ProtocolError::InvalidParameter { .. })),
                "{}",
                line
            );
        }
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            parse("getdata: source=x;action=drop").unwrap_err(),
            ProtocolError::UnknownAction {
                source_name: "x".to_string(),
                action: "drop".to_string()
            }
        );
    }
}
