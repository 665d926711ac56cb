use crate::models::*;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "OAuth2 OIDC Demo API",
        description = "A demo relying party and resource server backed by Keycloak.\n\n## Authentication\n\nAPI endpoints accept `Authorization: Bearer <jwt>` with either a Keycloak access token (RS256) or a locally issued token (HS256) obtained from `POST /api/auth/token`.",
        version = "1.0.0",
        license(
            name = "MIT",
        )
    ),
    paths(
        crate::routes::api::user_profile,
        crate::routes::api::user_claims,
        crate::routes::api::issue_token,
        crate::routes::api::protected,
        crate::routes::api::user_data,
        crate::routes::api::admin_data,
        crate::routes::api::health,
        crate::routes::api::echo,
    ),
    components(
        schemas(
            ApiResponse<UserDto>, ApiResponse<ClaimsDto>, ApiResponse<TokenDto>,
            ApiResponse<EchoResponse>, ApiResponse<String>,
            UserDto, ClaimsDto, TokenDto, EchoResponse,
        ),
    ),
    modifiers(&SecurityAddon)
    // No servers - let client determine the URL dynamically
)]
pub struct ApiDoc;

/// Security configuration for OpenAPI
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }

        openapi.security = Some(vec![utoipa::openapi::security::SecurityRequirement::new(
            "bearer",
            Vec::<String>::new(),
        )]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_generation_covers_schemas_and_security() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "OAuth2 OIDC Demo API");

        let components = spec.components.as_ref().unwrap();
        assert!(components.schemas.contains_key("UserDto"));
        assert!(components.schemas.contains_key("ClaimsDto"));
        assert!(components.security_schemes.contains_key("bearer"));

        // Servers are determined by the client, never hardcoded.
        assert!(spec.servers.is_none() || spec.servers.as_ref().unwrap().is_empty());
    }
}
