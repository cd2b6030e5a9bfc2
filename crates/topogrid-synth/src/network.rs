//! Network: a multi-zone VPC with public and private subnets.
//!
//! Each zone gets one public and one private block of the same size.
//! Public blocks are allocated first, then private ones, walking the VPC
//! range in order. All private subnets share a single NAT gateway placed
//! in the first public subnet. Flow logs capture all traffic.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info};

use topo_core::graph::{get_att, reference};
use topo_core::{LogicalId, Resource, ResourceGraph, SynthError, SynthResult};

use crate::iam::{PolicyStatement, inline_policy, service_trust_policy};

const SCOPE: &str = "Network";

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_SUBNET_MASK: u8 = 24;
pub const DEFAULT_FLOW_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Inputs to `build_network`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkProps {
    pub service_name: String,
    pub max_zones: u8,
    pub vpc_cidr: String,
    pub subnet_mask: u8,
    /// Flow-log aggregation window; must lie in [60s, 600s].
    pub flow_log_interval: Duration,
}

impl NetworkProps {
    pub fn new(service_name: &str, max_zones: u8) -> Self {
        Self {
            service_name: service_name.to_string(),
            max_zones,
            vpc_cidr: DEFAULT_VPC_CIDR.to_string(),
            subnet_mask: DEFAULT_SUBNET_MASK,
            flow_log_interval: DEFAULT_FLOW_LOG_INTERVAL,
        }
    }
}

/// Typed outputs of the network.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    pub vpc: LogicalId,
    pub public_subnets: Vec<LogicalId>,
    pub private_subnets: Vec<LogicalId>,
    pub public_cidrs: Vec<String>,
    pub private_cidrs: Vec<String>,
    /// Default routes to the internet gateway; load balancers wait on them.
    pub internet_routes: Vec<LogicalId>,
    pub nat_gateway: LogicalId,
    pub flow_log: LogicalId,
}

impl NetworkGraph {
    pub fn zones(&self) -> usize {
        self.public_subnets.len()
    }
}

pub fn build_network(graph: &mut ResourceGraph, props: &NetworkProps) -> SynthResult<NetworkGraph> {
    let name = &props.service_name;
    let zones = u32::from(props.max_zones);
    if zones == 0 {
        return Err(SynthError::InvalidProperty {
            resource: "Vpc".to_string(),
            reason: "a network needs at least one zone".to_string(),
        });
    }

    let vpc_block = Cidr::parse(&props.vpc_cidr).ok_or_else(|| SynthError::InvalidProperty {
        resource: "Vpc".to_string(),
        reason: format!("not an IPv4 CIDR: {}", props.vpc_cidr),
    })?;
    let interval = props.flow_log_interval.as_secs();
    if !(60..=600).contains(&interval) {
        return Err(SynthError::InvalidProperty {
            resource: "FlowLog".to_string(),
            reason: format!("aggregation interval must be 60..=600s, got {interval}s"),
        });
    }
    let blocks = vpc_block
        .subdivide(props.subnet_mask, zones * 2)
        .ok_or_else(|| SynthError::AddressSpaceExhausted {
            cidr: props.vpc_cidr.clone(),
            mask: props.subnet_mask,
            blocks: zones * 2,
        })?;
    let (public_blocks, private_blocks) = blocks.split_at(zones as usize);

    let vpc = graph.add(
        LogicalId::new(SCOPE, "Vpc"),
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": props.vpc_cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": name_tag(&format!("{name}-vpc")),
            }),
        ),
    )?;

    let igw = graph.add(
        LogicalId::new(SCOPE, "InternetGateway"),
        Resource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": name_tag(&format!("{name}-igw")) }),
        ),
    )?;
    let attachment = graph.add(
        LogicalId::new(SCOPE, "GatewayAttachment"),
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({
                "VpcId": reference(&vpc),
                "InternetGatewayId": reference(&igw),
            }),
        ),
    )?;

    let mut public_subnets = Vec::new();
    let mut internet_routes = Vec::new();
    for (zone, block) in public_blocks.iter().enumerate() {
        let subnet = declare_subnet(graph, &vpc, "Public", zone, block, true, name)?;
        let table = declare_route_table(graph, &vpc, &subnet, "Public", zone, name)?;
        let route = graph.add(
            LogicalId::new(SCOPE, &format!("PublicSubnet{}DefaultRoute", zone + 1)),
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": reference(&table),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference(&igw),
                }),
            )
            .depends_on(&attachment),
        )?;
        public_subnets.push(subnet);
        internet_routes.push(route);
    }

    let eip = graph.add(
        LogicalId::new(SCOPE, "NatEip"),
        Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })),
    )?;
    let nat_gateway = graph.add(
        LogicalId::new(SCOPE, "NatGateway"),
        Resource::new(
            "AWS::EC2::NatGateway",
            json!({
                "SubnetId": reference(&public_subnets[0]),
                "AllocationId": get_att(&eip, "AllocationId"),
                "Tags": name_tag(&format!("{name}-nat")),
            }),
        )
        .depends_on(&internet_routes[0]),
    )?;

    let mut private_subnets = Vec::new();
    for (zone, block) in private_blocks.iter().enumerate() {
        let subnet = declare_subnet(graph, &vpc, "Private", zone, block, false, name)?;
        let table = declare_route_table(graph, &vpc, &subnet, "Private", zone, name)?;
        graph.add(
            LogicalId::new(SCOPE, &format!("PrivateSubnet{}DefaultRoute", zone + 1)),
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": reference(&table),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": reference(&nat_gateway),
                }),
            ),
        )?;
        private_subnets.push(subnet);
    }

    let flow_log = declare_flow_log(graph, &vpc, name, interval)?;

    info!(
        service = %name,
        zones,
        vpc_cidr = %props.vpc_cidr,
        "network declared"
    );

    Ok(NetworkGraph {
        vpc,
        public_subnets,
        private_subnets,
        public_cidrs: public_blocks.iter().map(Cidr::to_string).collect(),
        private_cidrs: private_blocks.iter().map(Cidr::to_string).collect(),
        internet_routes,
        nat_gateway,
        flow_log,
    })
}

fn declare_subnet(
    graph: &mut ResourceGraph,
    vpc: &LogicalId,
    tier: &str,
    zone: usize,
    block: &Cidr,
    public: bool,
    name: &str,
) -> SynthResult<LogicalId> {
    debug!(tier, zone, cidr = %block, "allocating subnet");
    graph.add(
        LogicalId::new(SCOPE, &format!("{tier}Subnet{}", zone + 1)),
        Resource::new(
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(vpc),
                "CidrBlock": block.to_string(),
                "AvailabilityZone": { "Fn::Select": [zone, { "Fn::GetAZs": "" }] },
                "MapPublicIpOnLaunch": public,
                "Tags": name_tag(&format!("{name}-{}-{}", tier.to_lowercase(), zone + 1)),
            }),
        ),
    )
}

fn declare_route_table(
    graph: &mut ResourceGraph,
    vpc: &LogicalId,
    subnet: &LogicalId,
    tier: &str,
    zone: usize,
    name: &str,
) -> SynthResult<LogicalId> {
    let table = graph.add(
        LogicalId::new(SCOPE, &format!("{tier}Subnet{}RouteTable", zone + 1)),
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({
                "VpcId": reference(vpc),
                "Tags": name_tag(&format!("{name}-{}-{}", tier.to_lowercase(), zone + 1)),
            }),
        ),
    )?;
    graph.add(
        LogicalId::new(SCOPE, &format!("{tier}Subnet{}RouteTableAssociation", zone + 1)),
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "RouteTableId": reference(&table),
                "SubnetId": reference(subnet),
            }),
        ),
    )?;
    Ok(table)
}

fn declare_flow_log(
    graph: &mut ResourceGraph,
    vpc: &LogicalId,
    name: &str,
    interval_secs: u64,
) -> SynthResult<LogicalId> {
    let log_group = graph.add(
        LogicalId::new(SCOPE, "FlowLogGroup"),
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": format!("/aws/vpc/{name}/flow-logs"),
                "RetentionInDays": 30,
            }),
        ),
    )?;
    let role = graph.add(
        LogicalId::new(SCOPE, "FlowLogRole"),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": format!("{name}-flow-logs"),
                "AssumeRolePolicyDocument": service_trust_policy("vpc-flow-logs.amazonaws.com"),
                "Policies": [inline_policy(
                    "flow-log-delivery",
                    &[PolicyStatement::allow(
                        &["logs:CreateLogStream", "logs:PutLogEvents", "logs:DescribeLogStreams"],
                        vec![get_att(&log_group, "Arn")],
                    )],
                )],
            }),
        ),
    )?;
    graph.add(
        LogicalId::new(SCOPE, "FlowLog"),
        Resource::new(
            "AWS::EC2::FlowLog",
            json!({
                "ResourceId": reference(vpc),
                "ResourceType": "VPC",
                "TrafficType": "ALL",
                "LogDestinationType": "cloud-watch-logs",
                "LogGroupName": reference(&log_group),
                "DeliverLogsPermissionArn": get_att(&role, "Arn"),
                "MaxAggregationInterval": interval_secs,
            }),
        ),
    )
}

fn name_tag(value: &str) -> Value {
    json!([{ "Key": "Name", "Value": value }])
}

/// An IPv4 block, e.g. `10.0.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let base = u32::from(addr) & mask_bits(prefix);
        Some(Self { base, prefix })
    }

    /// The first `count` consecutive `/mask` blocks, if they fit.
    fn subdivide(&self, mask: u8, count: u32) -> Option<Vec<Cidr>> {
        if mask < self.prefix || mask > 32 {
            return None;
        }
        let available = 1u64 << (mask - self.prefix);
        if u64::from(count) > available {
            return None;
        }
        let step = 1u64 << (32 - mask);
        Some(
            (0..u64::from(count))
                .map(|i| Cidr {
                    base: (u64::from(self.base) + i * step) as u32,
                    prefix: mask,
                })
                .collect(),
        )
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.base), self.prefix)
    }
}

fn mask_bits(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
}
