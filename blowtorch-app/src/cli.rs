use std::ffi::OsString;
use std::net::Ipv4Addr;

use blowtorch_common::{parse_ipv4, parse_mac, AddressError, MacAddress};
use clap::{CommandFactory, Parser};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Floods one interface queue with a fixed UDP/IPv4 frame",
    long_about = None
)]
pub struct Args {
    /// Destination MAC address (xx:xx:xx:xx:xx:xx)
    #[arg(short = 'm', long, value_name = "MAC")]
    dst_mac: Option<String>,

    /// Source IPv4 address
    #[arg(short = 's', long, value_name = "IP")]
    src_ip: Option<String>,

    /// Destination IPv4 address
    #[arg(short = 'd', long, value_name = "IP")]
    dst_ip: Option<String>,

    #[arg(short, long, default_value = "eth0")]
    iface: String,

    /// Hardware queue to transmit on
    #[arg(short, long, default_value_t = 0)]
    queue: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing -{0} ({1})")]
    Missing(char, &'static str),
    #[error(transparent)]
    Address(#[from] AddressError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dst_mac: MacAddress,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub iface: String,
    pub queue: u32,
}

impl Args {
    /// Checks the required flags and parses the addresses.
    pub fn into_config(self) -> Result<Config, ArgumentError> {
        let dst_mac = self
            .dst_mac
            .ok_or(ArgumentError::Missing('m', "destination MAC"))?;
        let src_ip = self
            .src_ip
            .ok_or(ArgumentError::Missing('s', "source IP"))?;
        let dst_ip = self
            .dst_ip
            .ok_or(ArgumentError::Missing('d', "destination IP"))?;

        Ok(Config {
            dst_mac: parse_mac(&dst_mac)?,
            src_ip: parse_ipv4(&src_ip)?,
            dst_ip: parse_ipv4(&dst_ip)?,
            iface: self.iface,
            queue: self.queue,
        })
    }
}

/// Message and exit status for a command line that does not yield a `Config`.
#[derive(Debug, PartialEq, Eq)]
pub struct CliExit {
    pub message: String,
    pub code: i32,
}

// help and version go to stdout with status 0, every real failure is status 1
fn exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

pub fn config_from<I, T>(argv: I) -> Result<Config, CliExit>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv).map_err(|e| CliExit {
        message: e.render().to_string(),
        code: exit_code(&e),
    })?;

    args.into_config().map_err(|e| CliExit {
        message: format!("error: {}\n\n{}\n", e, Args::command().render_usage()),
        code: 1,
    })
}
