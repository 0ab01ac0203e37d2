//! Network fabric: one isolated network split into three tiers.
//!
//! Each availability zone gets a public `/24`, an application `/24` and a
//! data-tier `/28`. Public subnets come first in the address space, then the
//! application subnets, then one `/24` carved into data-tier `/28`s. A single
//! NAT path sits in the first public subnet.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StackSettings;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::{TopologyError, TopologyResult};

/// Name of the network resource.
pub const VPC_NAME: &str = "vpc";

/// Subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetTier {
    /// Internet-routable, hosts the NAT path.
    Public,
    /// Private with NAT egress, hosts every task.
    Application,
    /// Isolated, no egress.
    Data,
}

impl SubnetTier {
    const fn mask(self) -> u8 {
        match self {
            Self::Public | Self::Application => 24,
            Self::Data => 28,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Application => "application",
            Self::Data => "db",
        }
    }
}

/// Address plan for one fabric, computed before anything is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    /// Public subnets, one per zone.
    pub public: Vec<Ipv4Net>,
    /// Application subnets, one per zone.
    pub application: Vec<Ipv4Net>,
    /// Data-tier subnets, one per zone.
    pub data: Vec<Ipv4Net>,
}

impl AddressPlan {
    /// Carves `cidr` for `zones` availability zones.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`] if the range is too small.
    pub fn carve(cidr: Ipv4Net, zones: u8) -> TopologyResult<Self> {
        let zones = usize::from(zones);
        let too_small = || TopologyError::Config(format!("{cidr} cannot hold {zones} zones"));

        let mut blocks = cidr
            .subnets(SubnetTier::Public.mask())
            .map_err(|_| too_small())?;
        let public: Vec<_> = blocks.by_ref().take(zones).collect();
        let application: Vec<_> = blocks.by_ref().take(zones).collect();
        let data_block = blocks.next().ok_or_else(too_small)?;
        if public.len() != zones || application.len() != zones {
            return Err(too_small());
        }
        let data: Vec<_> = data_block
            .subnets(SubnetTier::Data.mask())
            .map_err(|_| too_small())?
            .take(zones)
            .collect();

        Ok(Self {
            public,
            application,
            data,
        })
    }

    /// Whether any two subnets share addresses.
    #[must_use]
    pub fn has_overlap(&self) -> bool {
        let all: Vec<_> = self
            .public
            .iter()
            .chain(&self.application)
            .chain(&self.data)
            .collect();
        all.iter().enumerate().any(|(i, a)| {
            all[i + 1..]
                .iter()
                .any(|b| a.contains(&b.network()) || b.contains(&a.network()))
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VpcSpec<'a> {
    cidr_block: Ipv4Net,
    enable_dns_hostnames: bool,
    enable_dns_support: bool,
    tags: BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubnetSpec {
    vpc_id: Token,
    cidr_block: Ipv4Net,
    availability_zone: String,
    tier: SubnetTier,
    map_public_ip_on_launch: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NatGatewaySpec {
    subnet_id: Token,
    egress_for: Vec<Token>,
}

/// Declared network.
#[derive(Debug, Clone)]
pub struct NetworkFabric {
    vpc: ResourceHandle,
    cidr: Ipv4Net,
    public_subnets: Vec<Token>,
    application_subnets: Vec<Token>,
    data_subnets: Vec<Token>,
    nat: ResourceHandle,
}

impl NetworkFabric {
    /// Declares the network, its subnets and the NAT path.
    ///
    /// # Errors
    ///
    /// Fails if the address range is too small or the engine rejects a
    /// declaration.
    pub fn build<E: ProvisioningEngine>(engine: &mut E, stack: &StackSettings) -> TopologyResult<Self> {
        let plan = AddressPlan::carve(stack.vpc_cidr, stack.max_azs)?;

        let vpc = engine.declare_spec(
            ResourceKind::Vpc,
            VPC_NAME,
            &VpcSpec {
                cidr_block: stack.vpc_cidr,
                enable_dns_hostnames: true,
                enable_dns_support: true,
                tags: BTreeMap::from([("Environment", stack.environment.as_str())]),
            },
        )?;
        let vpc_id = engine.reference(&vpc, "VpcId")?;

        let mut declare_tier = |tier: SubnetTier, cidrs: &[Ipv4Net]| -> TopologyResult<Vec<Token>> {
            cidrs
                .iter()
                .enumerate()
                .map(|(i, cidr)| {
                    let handle = engine.declare_spec(
                        ResourceKind::Subnet,
                        &format!("{}-{}", tier.label(), i + 1),
                        &SubnetSpec {
                            vpc_id: vpc_id.clone(),
                            cidr_block: *cidr,
                            availability_zone: zone_name(&stack.region, i),
                            tier,
                            map_public_ip_on_launch: tier == SubnetTier::Public,
                        },
                    )?;
                    Ok(engine.reference(&handle, "SubnetId")?)
                })
                .collect()
        };
        let public_subnets = declare_tier(SubnetTier::Public, &plan.public)?;
        let application_subnets = declare_tier(SubnetTier::Application, &plan.application)?;
        let data_subnets = declare_tier(SubnetTier::Data, &plan.data)?;

        let nat_subnet = public_subnets
            .first()
            .cloned()
            .ok_or_else(|| TopologyError::Config("no public subnet for NAT".to_string()))?;
        let nat = engine.declare_spec(
            ResourceKind::NatGateway,
            "nat",
            &NatGatewaySpec {
                subnet_id: nat_subnet,
                egress_for: application_subnets.clone(),
            },
        )?;

        info!(
            cidr = %stack.vpc_cidr,
            zones = stack.max_azs,
            environment = %stack.environment,
            "declared network fabric"
        );

        Ok(Self {
            vpc,
            cidr: stack.vpc_cidr,
            public_subnets,
            application_subnets,
            data_subnets,
            nat,
        })
    }

    /// Network handle.
    #[must_use]
    pub fn vpc(&self) -> &ResourceHandle {
        &self.vpc
    }

    /// Network address range.
    #[must_use]
    pub const fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// Public subnet ids.
    #[must_use]
    pub fn public_subnets(&self) -> &[Token] {
        &self.public_subnets
    }

    /// Application subnet ids; every task runs here.
    #[must_use]
    pub fn application_subnets(&self) -> &[Token] {
        &self.application_subnets
    }

    /// Data-tier subnet ids.
    #[must_use]
    pub fn data_subnets(&self) -> &[Token] {
        &self.data_subnets
    }

    /// NAT handle.
    #[must_use]
    pub fn nat(&self) -> &ResourceHandle {
        &self.nat
    }
}

fn zone_name(region: &str, index: usize) -> String {
    let letter = char::from(b'a' + (index % 26) as u8);
    format!("{region}{letter}")
}
