//! Message broker access.
//!
//! [`channel::BrokerConnector`] opens ready-to-use channels and
//! [`channel::BrokerChannel`] publishes on them.  [`amqp::AmqpConnector`]
//! is the RabbitMQ implementation.

pub mod amqp;
pub mod channel;
