use async_graphql::{Context, EmptySubscription, ErrorExtensions, Object, Schema};
use std::sync::Arc;

use crate::domain::device::{DeviceInput, DeviceUpdate, DeviceView};
use crate::domain::registry::{ActionReport, RegistryController};
use crate::error::RegistryError;

pub type SwitchboardSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

fn gql_error(e: RegistryError) -> async_graphql::Error {
    async_graphql::Error::new(e.to_string()).extend_with(|_, ext| ext.set("kind", e.kind()))
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Every registered device with its last observed status.
    async fn devices(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<DeviceView>> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        let devices = registry.list_devices().await;
        Ok(devices.into_iter().map(DeviceView::from).collect())
    }

    async fn device(&self, ctx: &Context<'_>, index: usize) -> async_graphql::Result<DeviceView> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry
            .device(index)
            .await
            .map(DeviceView::from)
            .map_err(gql_error)
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn add_device(
        &self,
        ctx: &Context<'_>,
        input: DeviceInput,
    ) -> async_graphql::Result<DeviceView> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        let index = registry.add_device(input).await.map_err(gql_error)?;
        registry
            .device(index)
            .await
            .map(DeviceView::from)
            .map_err(gql_error)
    }

    async fn edit_device(
        &self,
        ctx: &Context<'_>,
        index: usize,
        update: DeviceUpdate,
    ) -> async_graphql::Result<DeviceView> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry
            .edit_device(Some(index), update)
            .await
            .map_err(gql_error)?;
        registry
            .device(index)
            .await
            .map(DeviceView::from)
            .map_err(gql_error)
    }

    async fn remove_device(&self, ctx: &Context<'_>, index: usize) -> async_graphql::Result<bool> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry
            .remove_device(Some(index))
            .await
            .map(|_| true)
            .map_err(gql_error)
    }

    async fn reboot(&self, ctx: &Context<'_>, index: usize) -> async_graphql::Result<ActionReport> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry.reboot(Some(index)).await.map_err(gql_error)
    }

    async fn shutdown(
        &self,
        ctx: &Context<'_>,
        index: usize,
    ) -> async_graphql::Result<ActionReport> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry.shutdown(Some(index)).await.map_err(gql_error)
    }

    /// Broadcast a Wake-on-LAN packet for the device's MAC address.
    async fn wake(&self, ctx: &Context<'_>, index: usize) -> async_graphql::Result<ActionReport> {
        let registry = ctx.data::<Arc<RegistryController>>()?;
        registry.wake(Some(index)).await.map_err(gql_error)
    }
}

pub fn build_schema(registry: Arc<RegistryController>) -> SwitchboardSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(registry)
        .finish()
}
